mod common;

use common::*;
use dwell_spectra::core::fft::zero_doppler_bin;
use dwell_spectra::{
    Channel, ClutterFilterParams, DwellSpectra, FftPlanCache, IqGrid, SpectraParams, WindowType,
};
use ndarray::ArrayView2;
use std::sync::Arc;

fn clutter_dwell(seed: u64) -> (IqGrid, IqGrid) {
    let mut rng = rng(seed);
    let mut hc = noise_grid(&mut rng, N_GATES, N_SAMPLES);
    let mut vc = noise_grid(&mut rng, N_GATES, N_SAMPLES);
    add_ground_clutter(&mut hc, |_| 10.0);
    add_ground_clutter(&mut vc, |_| 10.0);
    (hc, vc)
}

fn run_dwell(clutter_filter: ClutterFilterParams, hc: &IqGrid, vc: &IqGrid) -> DwellSpectra {
    let params = SpectraParams {
        window: WindowType::VonHann,
        clutter_filter,
        ..Default::default()
    };
    let mut dwell = DwellSpectra::with_params(
        params,
        Arc::new(calibration()),
        Arc::new(FftPlanCache::new()),
    )
    .expect("filter parameters are valid");
    dwell.set_geometry(geometry());
    dwell.set_dimensions(N_GATES, N_SAMPLES);
    dwell.load_channel(Channel::Hc, hc.view()).unwrap();
    dwell.load_channel(Channel::Vc, vc.view()).unwrap();

    let report = dwell.compute_all();
    assert!(report.power_spectra.is_computed());
    assert!(report.iq_filter.is_computed());
    dwell
}

fn all_finite(grid: ArrayView2<'_, f64>) -> bool {
    grid.iter().all(|v| v.is_finite())
}

#[test]
fn test_filters_suppress_clutter_in_pipeline() {
    init_logging();
    let (hc, vc) = clutter_dwell(7);
    let center = zero_doppler_bin(N_SAMPLES);

    let unfiltered = run_dwell(ClutterFilterParams::None, &hc, &vc);
    let hc_unfiltered = unfiltered.channel(Channel::Hc);
    for gate in 0..N_GATES {
        assert!(hc_unfiltered.power()[[gate, center]] > 1.0e3);
        assert_eq!(hc_unfiltered.filter_ratio()[gate], 1.0);
    }

    let filters = [
        ClutterFilterParams::Notch { width_mps: 3.0 },
        ClutterFilterParams::Adaptive {
            init_width_mps: 1.0,
            max_width_mps: 6.0,
        },
        ClutterFilterParams::regression(),
    ];

    for clutter_filter in filters {
        let label = format!("{:?}", clutter_filter);
        let dwell = run_dwell(clutter_filter, &hc, &vc);

        for grid in [
            dwell.snr_db(),
            dwell.dbz(),
            dwell.zdr(),
            dwell.phidp(),
            dwell.rhohv(),
            dwell.tdbz(),
            dwell.zdr_sdev(),
            dwell.phidp_sdev(),
            dwell.cmd(),
        ] {
            assert!(all_finite(grid), "{}: non-finite product", label);
        }

        for channel in [Channel::Hc, Channel::Vc] {
            let data = dwell.channel(channel);
            assert!(all_finite(data.power_db()), "{}: non-finite power", label);
            assert!(data
                .iq_windowed()
                .iter()
                .all(|v| v.re.is_finite() && v.im.is_finite()));

            for gate in 0..N_GATES {
                let ratio = data.filter_ratio()[gate];
                assert!(ratio > 1.0, "{} {} gate {}: ratio {}", label, channel, gate, ratio);

                let noise = data.spectral_noise()[gate];
                let snr = data.spectral_snr()[gate];
                assert!(noise.is_finite() && noise > 0.0, "{}: spectral noise {}", label, noise);
                assert!(snr.is_finite() && snr > 0.0, "{}: spectral SNR {}", label, snr);
            }
        }

        let hc_filtered = dwell.channel(Channel::Hc);
        for gate in 0..N_GATES {
            let power = hc_filtered.power()[[gate, center]];
            assert!(
                power < 1.0e-2,
                "{} gate {}: zero-Doppler power {}",
                label,
                gate,
                power
            );
        }
    }
}
