use ndarray::Array2;
use sarglacier::core::{ClassifierParams, SurfaceClass, SurfaceClassifier};
use sarglacier::types::{DataQualityError, SarError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// dB raster brightening from west to east, with a little noise
fn gradient_db(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
    let mut state = seed;
    Array2::from_shape_fn((rows, cols), |(_, j)| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let noise = (state >> 40) as f32 / (1u64 << 24) as f32 - 0.5;
        -14.0 + 12.0 * j as f32 / cols as f32 + 0.1 * noise
    })
}

/// Dark disk of radius 20 (about -20 dB) centred in a 100x100 background of about -5 dB
fn disk_scene(noise_db: f32, seed: u64) -> Array2<f32> {
    let mut state = seed;
    Array2::from_shape_fn((100, 100), |(i, j)| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let noise = ((state >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 2.0 * noise_db;
        if in_disk(i, j, 20) { -20.0 + noise } else { -5.0 + noise }
    })
}

fn in_disk(i: usize, j: usize, radius: usize) -> bool {
    let (di, dj) = (i as isize - 50, j as isize - 50);
    (di * di + dj * dj) as usize <= radius * radius
}

fn disk_classifier() -> SurfaceClassifier {
    SurfaceClassifier::new(ClassifierParams {
        percentiles: vec![5.0, 15.0, 30.0, 50.0, 70.0],
        ..ClassifierParams::default()
    })
}

#[test]
fn test_dark_disk_below_lowest_bands_is_not_glacier() {
    init_logging();
    let image = disk_scene(0.0, 1);
    let disk_pixels = (0..100).flat_map(|i| (0..100).map(move |j| (i, j))).filter(|&(i, j)| in_disk(i, j, 20)).count();
    let region = disk_classifier().classify(&image).unwrap();

    // The disk holds about 12.6% of the samples, so the 5th percentile lands
    // inside it and every later percentile on the background
    let thresholds: Vec<f64> = region.thresholds().iter().map(|t| t.value_db).collect();
    assert_eq!(thresholds[0], -20.0);
    assert_eq!(thresholds[1], -5.0);

    for i in 0..100 {
        for j in 0..100 {
            if in_disk(i, j, 17) {
                assert_eq!(region.labels()[[i, j]], Some(SurfaceClass::ShadowRock), "pixel ({}, {})", i, j);
            }
        }
    }
    let shadow = region.pixel_count(SurfaceClass::ShadowRock) as f64;
    assert!((shadow - disk_pixels as f64).abs() <= 0.05 * disk_pixels as f64, "shadow {} vs disk {}", shadow, disk_pixels);
    assert_eq!(region.glacier_mask().iter().filter(|&&g| g).count(), 0);
}

#[test]
fn test_noisy_dark_disk_stays_in_dark_classes() {
    init_logging();
    let image = disk_scene(0.5, 11);
    let region = disk_classifier().classify(&image).unwrap();

    let thresholds: Vec<f64> = region.thresholds().iter().map(|t| t.value_db).collect();
    assert!((-20.5..=-19.5).contains(&thresholds[0]), "p5 = {}", thresholds[0]);
    assert!(thresholds[1] > -5.6, "p15 = {}", thresholds[1]);

    let glacier = region.glacier_mask();
    let mut outside_core = 0;
    for i in 0..100 {
        for j in 0..100 {
            if in_disk(i, j, 17) {
                let label = region.labels()[[i, j]];
                assert!(
                    matches!(label, Some(SurfaceClass::ShadowRock) | Some(SurfaceClass::DarkTerrain)),
                    "pixel ({}, {}) labelled {:?}", i, j, label
                );
                assert!(!glacier[[i, j]]);
            } else {
                outside_core += 1;
            }
        }
    }

    // Glacier classes come from the bright background bands only
    let glacier_pixels = glacier.iter().filter(|&&g| g).count();
    assert!(glacier_pixels > 0);
    assert!(glacier_pixels <= outside_core);
}

#[test]
fn test_injected_shadow_patch_is_shadow_rock() {
    init_logging();
    let mut image = gradient_db(100, 100, 7);
    // 400 px of deep shadow, 4% of the scene
    for i in 40..60 {
        for j in 40..60 {
            image[[i, j]] = -30.0;
        }
    }

    let region = SurfaceClassifier::default().classify(&image).unwrap();
    assert_eq!(region.thresholds()[0].value_db, -30.0);

    for i in 42..58 {
        for j in 42..58 {
            assert_eq!(region.labels()[[i, j]], Some(SurfaceClass::ShadowRock), "pixel ({}, {})", i, j);
        }
    }
    let shadow = region.pixel_count(SurfaceClass::ShadowRock);
    assert!((256..=400).contains(&shadow), "shadow pixels: {}", shadow);

    // The bright eastern edge is debris
    assert_eq!(region.labels()[[10, 98]], Some(SurfaceClass::DebrisRock));
}

#[test]
fn test_classes_partition_valid_pixels() {
    init_logging();
    let mut image = gradient_db(80, 120, 3);
    for j in 0..120 {
        image[[0, j]] = f32::NAN;
    }
    image[[40, 40]] = f32::INFINITY;

    let region = SurfaceClassifier::default().classify(&image).unwrap();
    assert_eq!(region.valid_pixel_count(), 80 * 120 - 121);
    assert_eq!(region.classes().len(), 7);

    let mut total = 0;
    for &class in region.classes() {
        total += region.pixel_count(class);
    }
    assert_eq!(total, region.valid_pixel_count());

    for (label, value) in region.labels().iter().zip(image.iter()) {
        assert_eq!(label.is_some(), value.is_finite());
    }

    let glacier = region.glacier_mask();
    for (&in_glacier, label) in glacier.iter().zip(region.labels().iter()) {
        assert_eq!(in_glacier, label.map_or(false, |c| c.is_glacier()));
    }
}

#[test]
fn test_more_percentiles_give_more_ice_levels() {
    init_logging();
    let params = ClassifierParams {
        percentiles: vec![2.0, 10.0, 25.0, 40.0, 55.0, 75.0, 90.0],
        ..ClassifierParams::default()
    };
    let region = SurfaceClassifier::new(params).classify(&gradient_db(60, 160, 5)).unwrap();
    assert_eq!(
        region.classes(),
        &[
            SurfaceClass::ShadowRock,
            SurfaceClass::DarkTerrain,
            SurfaceClass::Ice(1),
            SurfaceClass::Ice(2),
            SurfaceClass::Ice(3),
            SurfaceClass::Ice(4),
            SurfaceClass::SnowMixed,
            SurfaceClass::DebrisRock,
        ]
    );
    assert_eq!(region.thresholds().len(), 7);
}

#[test]
fn test_constant_scene_still_partitions() {
    init_logging();
    let image = Array2::from_elem((64, 64), -8.0f32);
    let region = SurfaceClassifier::default().classify(&image).unwrap();

    let values: Vec<f64> = region.thresholds().iter().map(|t| t.value_db).collect();
    assert!(values.windows(2).all(|w| w[0] < w[1]));
    // Every sample sits on the lowest threshold
    assert_eq!(region.pixel_count(SurfaceClass::ShadowRock), 64 * 64);
}

#[test]
fn test_all_nan_scene_has_no_valid_pixels() {
    let image = Array2::from_elem((64, 64), f32::NAN);
    let err = SurfaceClassifier::default().classify(&image).unwrap_err();
    assert!(matches!(err, SarError::DataQuality(DataQualityError::NoValidPixels)));
}
