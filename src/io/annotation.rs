use crate::types::{GroundControlPoint, Polarization, SarError, SarResult};
use chrono::NaiveDateTime;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::path::Path;

/// Sentinel-1 product annotation, reduced to what geolocation needs.
/// This represents the root <product> element directly
#[derive(Debug, Deserialize)]
pub struct AnnotationRoot {
    #[serde(rename = "adsHeader", default)]
    pub ads_header: Option<AdsHeader>,
    #[serde(rename = "imageAnnotation", default)]
    pub image_annotation: Option<ImageAnnotation>,
    #[serde(rename = "geolocationGrid", default)]
    pub geolocation_grid: Option<GeolocationGrid>,
}

#[derive(Debug, Deserialize)]
pub struct AdsHeader {
    #[serde(rename = "missionId", default)]
    pub mission_id: Option<String>,
    #[serde(rename = "productType", default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub polarisation: Option<String>,
    #[serde(rename = "startTime", default)]
    pub start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageAnnotation {
    #[serde(rename = "imageInformation")]
    pub image_information: ImageInformation,
}

#[derive(Debug, Deserialize)]
pub struct ImageInformation {
    #[serde(rename = "numberOfSamples")]
    pub number_of_samples: usize,
    #[serde(rename = "numberOfLines")]
    pub number_of_lines: usize,
    #[serde(rename = "rangePixelSpacing", default)]
    pub range_pixel_spacing: Option<f64>,
    #[serde(rename = "azimuthPixelSpacing", default)]
    pub azimuth_pixel_spacing: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGrid {
    #[serde(rename = "geolocationGridPointList")]
    pub point_list: GeolocationGridPointList,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGridPointList {
    #[serde(rename = "geolocationGridPoint", default)]
    pub points: Vec<GeolocationGridPoint>,
}

#[derive(Debug, Deserialize)]
pub struct GeolocationGridPoint {
    pub line: f64,
    pub pixel: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub height: Option<f64>,
}

/// Geolocation-relevant content of one annotation file
#[derive(Debug, Clone)]
pub struct SceneAnnotation {
    pub control_points: Vec<GroundControlPoint>,
    /// (width, height) in pixels, when the file carries image information
    pub dimensions: Option<(usize, usize)>,
    pub polarization: Option<Polarization>,
    pub start_time: Option<NaiveDateTime>,
}

/// Parser for Sentinel-1 annotation XML files
pub struct AnnotationParser;

impl AnnotationParser {
    /// Parse complete annotation XML
    pub fn parse_annotation(xml_content: &str) -> SarResult<AnnotationRoot> {
        from_str::<AnnotationRoot>(xml_content)
            .map_err(|e| SarError::XmlParsing(format!("Failed to parse annotation XML: {}", e)))
    }

    /// Ground control points of the geolocation grid
    pub fn extract_control_points(annotation: &AnnotationRoot) -> SarResult<Vec<GroundControlPoint>> {
        let points = annotation.geolocation_grid.as_ref()
            .map(|grid| grid.point_list.points.as_slice())
            .unwrap_or_default();

        if points.is_empty() {
            return Err(SarError::InvalidFormat(
                "No geolocation grid points found in annotation".to_string(),
            ));
        }

        let gcps: Vec<GroundControlPoint> = points.iter()
            .map(|p| GroundControlPoint {
                pixel_col: p.pixel,
                pixel_row: p.line,
                longitude: p.longitude,
                latitude: p.latitude,
                height: p.height,
            })
            .collect();

        log::debug!("Extracted {} geolocation grid points", gcps.len());
        Ok(gcps)
    }

    /// Raster (width, height) from image information
    pub fn image_dimensions(annotation: &AnnotationRoot) -> Option<(usize, usize)> {
        annotation.image_annotation.as_ref().map(|ia| {
            (ia.image_information.number_of_samples, ia.image_information.number_of_lines)
        })
    }

    /// Polarization from the header
    pub fn polarization(annotation: &AnnotationRoot) -> Option<Polarization> {
        annotation.ads_header.as_ref()?
            .polarisation.as_deref()?
            .trim()
            .parse()
            .ok()
    }

    /// Acquisition start time from the header
    pub fn start_time(annotation: &AnnotationRoot) -> Option<NaiveDateTime> {
        let raw = annotation.ads_header.as_ref()?.start_time.as_deref()?;
        NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S%.f").ok()
    }

    /// Parse an annotation document into its geolocation content
    pub fn scene_annotation(xml_content: &str) -> SarResult<SceneAnnotation> {
        let annotation = Self::parse_annotation(xml_content)?;
        Ok(SceneAnnotation {
            control_points: Self::extract_control_points(&annotation)?,
            dimensions: Self::image_dimensions(&annotation),
            polarization: Self::polarization(&annotation),
            start_time: Self::start_time(&annotation),
        })
    }

    /// Read and parse an annotation file
    pub fn read_annotation_file<P: AsRef<Path>>(path: P) -> SarResult<SceneAnnotation> {
        let path = path.as_ref();
        log::debug!("Reading annotation {}", path.display());
        let xml_content = std::fs::read_to_string(path)?;
        Self::scene_annotation(&xml_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <product>
            <adsHeader>
                <missionId>S1A</missionId>
                <productType>GRD</productType>
                <polarisation>VV</polarisation>
                <startTime>2020-08-15T00:59:13.123456</startTime>
            </adsHeader>
            <imageAnnotation>
                <imageInformation>
                    <numberOfSamples>25000</numberOfSamples>
                    <numberOfLines>16000</numberOfLines>
                    <rangePixelSpacing>1.0e+01</rangePixelSpacing>
                </imageInformation>
            </imageAnnotation>
            <geolocationGrid>
                <geolocationGridPointList count="2">
                    <geolocationGridPoint>
                        <line>0</line>
                        <pixel>0</pixel>
                        <latitude>4.250000e+01</latitude>
                        <longitude>7.440000e+01</longitude>
                        <height>3.500000e+03</height>
                    </geolocationGridPoint>
                    <geolocationGridPoint>
                        <line>0</line>
                        <pixel>1249</pixel>
                        <latitude>4.252000e+01</latitude>
                        <longitude>7.470000e+01</longitude>
                        <height>3.400000e+03</height>
                    </geolocationGridPoint>
                </geolocationGridPointList>
            </geolocationGrid>
        </product>"#;

    #[test]
    fn test_annotation_parsing() {
        let scene = AnnotationParser::scene_annotation(SAMPLE_XML).unwrap();
        assert_eq!(scene.control_points.len(), 2);
        assert_eq!(scene.control_points[1].pixel_col, 1249.0);
        assert_eq!(scene.control_points[1].longitude, 74.7);
        assert_eq!(scene.control_points[0].height, Some(3500.0));
        assert_eq!(scene.dimensions, Some((25000, 16000)));
        assert_eq!(scene.polarization, Some(Polarization::VV));
        assert!(scene.start_time.is_some());
    }

    #[test]
    fn test_missing_grid_is_invalid_format() {
        let xml = "<product><adsHeader><polarisation>VH</polarisation></adsHeader></product>";
        let err = AnnotationParser::scene_annotation(xml).unwrap_err();
        assert!(matches!(err, SarError::InvalidFormat(_)));
    }

    #[test]
    fn test_malformed_xml() {
        let err = AnnotationParser::parse_annotation("<product><imageAnnotation></product>").unwrap_err();
        assert!(matches!(err, SarError::XmlParsing(_)));
    }
}
