pub mod voc_parser;

pub use voc_parser::{
    classify_label, parse_annotation, parse_annotation_str, AnnotatedObject, AnnotationDocument,
    ObjectLabel,
};
