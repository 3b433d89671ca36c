//! Round trips between hierarchies, JSON and disk.

use std::path::{Path, PathBuf};

use crate::data::PixelCalibration;
use crate::format::{FormatError, ProjectFile};
use crate::model::{AnnotationHierarchy, ObjectHierarchy, ObjectKind, PathObject, Roi};

fn sample_hierarchy() -> ObjectHierarchy {
    let mut h = ObjectHierarchy::new();
    let core = h
        .add_tma_core("B-2", Roi::ellipse(0.0, 0.0, 300.0, 300.0))
        .unwrap();
    let region = h
        .add_annotation(Some(core), Roi::rectangle(20.0, 20.0, 200.0, 150.0), None)
        .unwrap();
    h.add_annotation(
        Some(region),
        Roi::polygon([(30.0, 30.0), (90.0, 35.0), (60.0, 95.0)]),
        Some("Stroma".to_string()),
    )
    .unwrap();
    h.add_annotation(
        Some(core),
        Roi::Polyline {
            vertices: vec![(10.0, 250.0).into(), (200.0, 260.0).into()],
        },
        None,
    )
    .unwrap();
    let missing = h
        .add_tma_core("B-3", Roi::ellipse(300.0, 0.0, 300.0, 300.0))
        .unwrap();
    h.set_missing(missing, true).unwrap();
    h
}

#[test]
fn test_hierarchy_roundtrip() {
    let original = sample_hierarchy();
    let mut project = ProjectFile::from_hierarchy(&original);
    project.image = Some(PathBuf::from("slide.png"));
    project.calibration = Some(PixelCalibration::microns(0.25));

    let json = project.to_json().unwrap();
    let loaded = ProjectFile::from_json(&json).unwrap();
    assert_eq!(loaded, project);

    let rebuilt = loaded.to_hierarchy().unwrap();
    assert_eq!(rebuilt.len(), original.len());
    for object in original.iter() {
        assert_eq!(rebuilt.get(object.id), Some(object));
    }
    assert_eq!(rebuilt.leaf_annotations(1), original.leaf_annotations(1));
}

#[test]
fn test_json_layout() {
    let project = ProjectFile::from_hierarchy(&sample_hierarchy());
    let value: serde_json::Value = serde_json::from_str(&project.to_json().unwrap()).unwrap();
    assert_eq!(value["version"], "0.1.0");
    let first = &value["objects"][0];
    assert_eq!(first["kind"], "tma_core");
    assert_eq!(first["name"], "B-2");
    assert_eq!(first["roi"]["type"], "ellipse");
    assert!(value.get("image").is_none());
}

#[test]
fn test_children_before_parents_are_accepted() {
    let mut project = ProjectFile::from_hierarchy(&sample_hierarchy());
    project.objects.reverse();
    let rebuilt = project.to_hierarchy().unwrap();
    assert_eq!(rebuilt.len(), 5);
    assert_eq!(rebuilt.children(1).len(), 2);
}

#[test]
fn test_missing_parent_rejected() {
    let mut project = ProjectFile::new();
    project.objects.push(PathObject {
        id: 4,
        parent: Some(9),
        kind: ObjectKind::Annotation {
            classification: None,
        },
        roi: Roi::rectangle(0.0, 0.0, 1.0, 1.0),
    });
    assert!(matches!(
        project.to_hierarchy(),
        Err(FormatError::InvalidFormat { .. })
    ));
}

#[test]
fn test_cycle_rejected() {
    let annotation = |id, parent| PathObject {
        id,
        parent: Some(parent),
        kind: ObjectKind::Annotation {
            classification: None,
        },
        roi: Roi::rectangle(0.0, 0.0, 1.0, 1.0),
    };
    let mut project = ProjectFile::new();
    project.objects = vec![annotation(1, 2), annotation(2, 1)];
    let err = project.to_hierarchy().unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_duplicate_ids_rejected() {
    let mut project = ProjectFile::from_hierarchy(&sample_hierarchy());
    let copy = project.objects[0].clone();
    project.objects.push(copy);
    assert!(project.to_hierarchy().is_err());
}

#[test]
fn test_version_parsing() {
    assert_eq!(ProjectFile::parse_version("0.1.0"), Some((0, 1, 0)));
    assert_eq!(ProjectFile::parse_version("10.20.30"), Some((10, 20, 30)));
    assert_eq!(ProjectFile::parse_version("1.2"), None);
    assert_eq!(ProjectFile::parse_version("1.2.3.4"), None);
    assert_eq!(ProjectFile::parse_version("a.b.c"), None);
}

#[test]
fn test_version_compatibility() {
    assert!(ProjectFile::is_version_compatible(ProjectFile::CURRENT_VERSION));
    assert!(ProjectFile::is_version_compatible("0.1.7"));
    assert!(!ProjectFile::is_version_compatible("0.2.0"));
    assert!(ProjectFile::is_version_readable("0.2.0"));
    assert!(!ProjectFile::is_version_readable("3.0.0"));
}

#[test]
fn test_unreadable_version_rejected() {
    let err = ProjectFile::from_json(r#"{ "version": "3.0.0", "objects": [] }"#).unwrap_err();
    assert!(matches!(err, FormatError::VersionMismatch { .. }));
}

#[test]
fn test_resolve_image() {
    let mut project = ProjectFile::new();
    assert_eq!(project.resolve_image(Path::new("/data/p.json")), None);
    project.image = Some(PathBuf::from("slides/a.png"));
    assert_eq!(
        project.resolve_image(Path::new("/data/p.json")),
        Some(PathBuf::from("/data/slides/a.png"))
    );
}

#[test]
fn test_save_and_load() {
    let path = std::env::temp_dir().join(format!("tmalign-project-{}.json", std::process::id()));
    let mut project = ProjectFile::from_hierarchy(&sample_hierarchy());
    project.image = Some(PathBuf::from("slide.png"));
    project.save(&path).unwrap();
    let loaded = ProjectFile::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, project);
}
