use sarglacier::core::{GeolocationParams, GeolocationResolver, TransformOrder};
use sarglacier::io::AnnotationParser;
use sarglacier::types::{BoundingBox, GeometryError, SarError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Annotation with a 4x4 geolocation grid over a 1000 x 800 scene, 0.0002° per pixel
fn annotation_xml() -> String {
    let mut points = String::new();
    for line in [0, 266, 533, 799] {
        for pixel in [0, 333, 666, 999] {
            let lon = 74.40 + pixel as f64 * 0.0002;
            let lat = 42.55 - line as f64 * 0.0002;
            points.push_str(&format!(
                "<geolocationGridPoint><line>{}</line><pixel>{}</pixel>\
                 <latitude>{:.6}</latitude><longitude>{:.6}</longitude><height>3800.0</height>\
                 </geolocationGridPoint>",
                line, pixel, lat, lon
            ));
        }
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
        <product>
            <adsHeader>
                <missionId>S1B</missionId>
                <productType>GRD</productType>
                <polarisation>VH</polarisation>
                <startTime>2019-08-02T00:58:47.000000</startTime>
            </adsHeader>
            <imageAnnotation>
                <imageInformation>
                    <numberOfSamples>1000</numberOfSamples>
                    <numberOfLines>800</numberOfLines>
                </imageInformation>
            </imageAnnotation>
            <geolocationGrid>
                <geolocationGridPointList count="16">{}</geolocationGridPointList>
            </geolocationGrid>
        </product>"#,
        points
    )
}

#[test]
fn test_annotation_grid_resolves_target_window() {
    init_logging();
    let annotation = AnnotationParser::scene_annotation(&annotation_xml()).unwrap();
    assert_eq!(annotation.control_points.len(), 16);
    assert_eq!(annotation.dimensions, Some((1000, 800)));

    let resolver = GeolocationResolver::default();
    let transform = resolver.build_transform(&annotation.control_points).unwrap();
    assert_eq!(transform.control_points_used(), 16);
    assert!(transform.rms_residual() < 1e-3);

    let target = BoundingBox::new(74.46, 74.52, 42.44, 42.50).unwrap();
    let window = resolver.resolve_window(&transform, &target, 1000, 800).unwrap();
    // lon 74.46..74.52 -> cols 300..600, lat 42.50..42.44 -> rows 250..550
    assert_eq!((window.col_off, window.row_off), (300, 250));
    assert_eq!((window.width, window.height), (300, 300));
}

#[test]
fn test_quadratic_fit_matches_affine_grid() {
    init_logging();
    let annotation = AnnotationParser::scene_annotation(&annotation_xml()).unwrap();
    let resolver = GeolocationResolver::new(GeolocationParams {
        transform_order: TransformOrder::Quadratic,
        ..GeolocationParams::default()
    });
    let transform = resolver.build_transform(&annotation.control_points).unwrap();
    assert_eq!(transform.order(), TransformOrder::Quadratic);

    let (col, row) = transform.geo_to_pixel(74.50, 42.45);
    assert!((col - 500.0).abs() < 1e-3, "col {}", col);
    assert!((row - 500.0).abs() < 1e-3, "row {}", row);
}

#[test]
fn test_target_partly_outside_scene_is_too_small() {
    init_logging();
    let annotation = AnnotationParser::scene_annotation(&annotation_xml()).unwrap();
    let resolver = GeolocationResolver::default();
    let transform = resolver.build_transform(&annotation.control_points).unwrap();

    // Only the westernmost 20 columns of this target lie inside the scene
    let target = BoundingBox::new(74.596, 74.65, 42.44, 42.50).unwrap();
    let err = resolver.resolve_window(&transform, &target, 1000, 800).unwrap_err();
    assert!(matches!(
        err,
        SarError::Geometry(GeometryError::WindowTooSmall { width: 20, height: 300, min: 50 })
    ));

    let far_away = BoundingBox::new(10.0, 10.1, 46.0, 46.1).unwrap();
    let err = resolver.resolve_window(&transform, &far_away, 1000, 800).unwrap_err();
    assert!(matches!(err, SarError::Geometry(GeometryError::OutOfBounds { .. })));
}
