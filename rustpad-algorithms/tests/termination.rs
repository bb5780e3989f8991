use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustpad_algorithms::{
    decluster_element, DeclusterConfig, LocalMaximaFinder, PixelMap, PreclusterBuilder,
};
use rustpad_core::{
    Cathode, DetectionElement, Digit, Error, MathiesonResponse, ResponseConfig, ZonedSegmentation,
};

fn element() -> DetectionElement<ZonedSegmentation> {
    let plane = || ZonedSegmentation::uniform(4.0, 4.0, 0.25, 0.25).unwrap();
    DetectionElement::new(9, plane(), plane())
}

/// Random digits on both cathodes of the central 4x4 region.
fn noise(seed: u64, count: usize) -> Vec<Digit> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let cathode = if rng.gen_bool(0.5) {
                Cathode::Bending
            } else {
                Cathode::NonBending
            };
            Digit::new(
                cathode,
                rng.gen_range(4..12),
                rng.gen_range(4..12),
                rng.gen_range(6.0..60.0),
            )
        })
        .collect()
}

#[test]
fn test_uniform_plateau_is_one_region() {
    let map = PixelMap::from_grid(10, 10, (0.25, 0.25), &[5.0; 100]).unwrap();
    let maxima = LocalMaximaFinder::new(1 << 16).find(&map).unwrap();
    assert_eq!(maxima.len(), 1);
    assert_eq!(maxima[0].plateau_size, 100);
}

#[test]
fn test_plateau_budget_is_an_error() {
    let map = PixelMap::from_grid(40, 40, (0.25, 0.25), &[5.0; 1600]).unwrap();
    let err = LocalMaximaFinder::new(1000).find(&map).unwrap_err();
    assert!(matches!(err, Error::RecursionBudgetExceeded { budget: 1000, .. }));
}

#[test]
fn test_noise_terminates_with_disjoint_hits() {
    let de = element();
    let response = MathiesonResponse::new(ResponseConfig::default()).unwrap();
    let config = DeclusterConfig::default();

    for seed in 0..8 {
        let digits = noise(seed, 150);
        let output = decluster_element(&de, &digits, &response, &config).unwrap();

        let mut owned = HashSet::new();
        for hit in output.hits.iter() {
            assert!(hit.charge >= config.min_hit_charge);
            for pad in &hit.pads {
                assert!(owned.insert(*pad), "pad {pad:?} owned twice (seed {seed})");
            }
        }
        assert_eq!(output.statistics.hits_emitted, output.hits.len());
    }
}

#[test]
fn test_pool_drains() {
    let de = element();
    let config = DeclusterConfig::default();
    let digits = noise(42, 200);
    let mut builder = PreclusterBuilder::new(&de, &digits, 6.0, &config);

    // Give every pad back each time: the offer bound must still drain the pool.
    let mut rounds = 0;
    while let Some(precluster) = builder.next_precluster() {
        for i in 0..precluster.len() {
            if let Some(slot) = precluster.slot(i) {
                builder.release(slot);
            }
        }
        rounds += 1;
        assert!(rounds <= 3 * builder.pool_size() + 1);
    }
    assert_eq!(builder.free_pads(), 0);
}
