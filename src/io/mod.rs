//! Input/output collaborators: annotation XML, file names, JSON records

pub mod annotation;
pub mod naming;
pub mod records;

pub use annotation::{AnnotationParser, SceneAnnotation};
pub use naming::{parse_scene_name, SceneName};
pub use records::{
    write_json, BatchRecord, ClassRecord, ComparisonRecord, SceneRecord, SkippedRecord, TrendRecord,
};
