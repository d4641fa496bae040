//! Integration tests for container serialization and file round-trips.

use std::sync::Arc;

use attrmeta::metadata::{
    is_compressed, DomainLayout, Metadata, INVALID_ENTRY_KEY, VERSION_LEGACY,
};
use attrmeta::selector::{AttributeIdentifier, DomainId};
use attrmeta::util::{DQuat, DVec2, DVec3, DVec4, Name, Rotator, Transform};

use tempfile::NamedTempFile;

fn sample() -> Metadata {
    let m = Metadata::new(DomainLayout::points());
    for _ in 0..3 {
        m.add_entry(DomainId::ELEMENTS, INVALID_ENTRY_KEY).unwrap();
    }
    let id = AttributeIdentifier::new;

    m.create_attribute(&id("F"), 0.0f32, true, false).unwrap().set_value(0, 1.25).unwrap();
    m.create_attribute(&id("D"), 0.0f64, true, false).unwrap().set_value(1, -2.5).unwrap();
    m.create_attribute(&id("I"), 0i32, true, false).unwrap().set_value(2, 7).unwrap();
    m.create_attribute(&id("L"), 0i64, true, false).unwrap().set_value(0, 1 << 40).unwrap();
    m.create_attribute(&id("V2"), DVec2::ZERO, true, false)
        .unwrap()
        .set_value(1, DVec2::new(1.0, 2.0))
        .unwrap();
    m.create_attribute(&id("V3"), DVec3::ONE, true, false)
        .unwrap()
        .set_value(2, DVec3::new(3.0, 4.0, 5.0))
        .unwrap();
    m.create_attribute(&id("V4"), DVec4::ZERO, true, false)
        .unwrap()
        .set_value(0, DVec4::new(1.0, 0.0, 0.0, 1.0))
        .unwrap();
    m.create_attribute(&id("Q"), DQuat::IDENTITY, true, false)
        .unwrap()
        .set_value(1, DQuat::from_rotation_z(0.5))
        .unwrap();
    m.create_attribute(&id("T"), Transform::IDENTITY, true, false)
        .unwrap()
        .set_value(2, Transform::from_translation(DVec3::new(0.0, 1.0, 0.0)))
        .unwrap();
    m.create_attribute(&id("S"), String::from("none"), false, false)
        .unwrap()
        .set_value(0, "text".into())
        .unwrap();
    m.create_attribute(&id("B"), false, false, false).unwrap().set_value(1, true).unwrap();
    m.create_attribute(&id("R"), Rotator::ZERO, true, false)
        .unwrap()
        .set_value(2, Rotator::new(0.0, 90.0, 0.0))
        .unwrap();
    m.create_attribute(&id("N"), Name::none(), false, false)
        .unwrap()
        .set_value(0, Name::new("Tree"))
        .unwrap();

    let global = AttributeIdentifier::with_domain("Seed", DomainId::DATA);
    m.create_attribute(&global, 42i32, true, false).unwrap();
    m
}

fn check_sample(m: &Metadata) {
    let id = AttributeIdentifier::new;
    assert_eq!(m.get_typed_attribute::<f32>(&id("F")).unwrap().get_value_from_item_key(0), 1.25);
    assert_eq!(m.get_typed_attribute::<f64>(&id("D")).unwrap().get_value_from_item_key(1), -2.5);
    let ints = m.get_typed_attribute::<i32>(&id("I")).unwrap();
    assert_eq!(ints.get_values_from_item_keys(&[0, 2]), vec![0, 7]);
    assert_eq!(m.get_typed_attribute::<i64>(&id("L")).unwrap().get_value_from_item_key(0), 1 << 40);
    assert_eq!(
        m.get_typed_attribute::<DVec2>(&id("V2")).unwrap().get_value_from_item_key(1),
        DVec2::new(1.0, 2.0)
    );
    let v3 = m.get_typed_attribute::<DVec3>(&id("V3")).unwrap();
    assert_eq!(v3.get_value_from_item_key(0), DVec3::ONE);
    assert_eq!(v3.get_value_from_item_key(2), DVec3::new(3.0, 4.0, 5.0));
    assert_eq!(
        m.get_typed_attribute::<DVec4>(&id("V4")).unwrap().get_value_from_item_key(0),
        DVec4::new(1.0, 0.0, 0.0, 1.0)
    );
    assert_eq!(
        m.get_typed_attribute::<DQuat>(&id("Q")).unwrap().get_value_from_item_key(1),
        DQuat::from_rotation_z(0.5)
    );
    assert_eq!(
        m.get_typed_attribute::<Transform>(&id("T")).unwrap().get_value_from_item_key(2),
        Transform::from_translation(DVec3::new(0.0, 1.0, 0.0))
    );
    let s = m.get_typed_attribute::<String>(&id("S")).unwrap();
    assert_eq!(s.get_value_from_item_key(0), "text");
    assert_eq!(s.get_value_from_item_key(1), "none");
    assert!(m.get_typed_attribute::<bool>(&id("B")).unwrap().get_value_from_item_key(1));
    assert_eq!(
        m.get_typed_attribute::<Rotator>(&id("R")).unwrap().get_value_from_item_key(2),
        Rotator::new(0.0, 90.0, 0.0)
    );
    assert_eq!(
        m.get_typed_attribute::<Name>(&id("N")).unwrap().get_value_from_item_key(0),
        Name::new("tree")
    );
    let global = AttributeIdentifier::with_domain("Seed", DomainId::DATA);
    assert_eq!(m.get_typed_attribute::<i32>(&global).unwrap().default_value(), 42);
}

#[test]
fn test_file_roundtrip_compressed_and_raw() {
    let m = sample();
    for level in [0, 6] {
        let temp = NamedTempFile::new().expect("Failed to create temp file");
        m.save_to_file_with_level(temp.path(), level).expect("Failed to save");

        let bytes = std::fs::read(temp.path()).unwrap();
        assert_eq!(is_compressed(&bytes), level > 0);

        let back = Metadata::load_from_file(temp.path()).expect("Failed to load");
        check_sample(&back);
        assert_eq!(back.item_count(DomainId::ELEMENTS), 3);
        assert_eq!(back.layout().default_domain, DomainId::ELEMENTS);
    }
}

#[test]
fn test_child_is_written_flattened() {
    let parent = Arc::new(sample());
    let child = Metadata::new_child(&parent, true).unwrap();
    let extra = child.add_entry(DomainId::ELEMENTS, 1).unwrap();
    child
        .get_typed_attribute::<i32>(&AttributeIdentifier::new("I"))
        .unwrap()
        .set_value(extra, 99)
        .unwrap();

    let back = Metadata::read_from(&mut child.to_bytes().unwrap().as_slice()).unwrap();
    assert!(back.parent().is_none());
    check_sample(&back);
    assert_eq!(back.item_count(DomainId::ELEMENTS), 4);
    assert_eq!(
        back.get_typed_attribute::<i32>(&AttributeIdentifier::new("I"))
            .unwrap()
            .get_value_from_item_key(extra),
        99
    );
}

#[test]
fn test_legacy_version_keeps_default_domain() {
    let m = sample();
    let mut bytes = Vec::new();
    m.write_to_version(&mut bytes, VERSION_LEGACY).unwrap();

    let back = Metadata::read_from(&mut bytes.as_slice()).unwrap();
    assert_eq!(back.layout(), &DomainLayout::single());
    assert_eq!(back.item_count(DomainId::ELEMENTS), 3);
    assert!(back
        .get_attribute(&AttributeIdentifier::with_domain("Seed", DomainId::DATA))
        .is_none());

    let points = Metadata::read_with_layout(&mut bytes.as_slice(), DomainLayout::points()).unwrap();
    assert_eq!(points.domain_id_from_name("Points"), Some(DomainId::ELEMENTS));
    assert_eq!(
        points
            .get_typed_attribute::<i32>(&AttributeIdentifier::new("I"))
            .unwrap()
            .get_value_from_item_key(2),
        7
    );
}

#[test]
fn test_truncated_file_is_an_error() {
    let m = sample();
    let bytes = m.to_bytes().unwrap();
    for cut in [3, 9, bytes.len() / 2, bytes.len() - 1] {
        assert!(Metadata::read_from(&mut &bytes[..cut]).is_err(), "cut at {cut}");
    }

    let temp = NamedTempFile::new().expect("Failed to create temp file");
    std::fs::write(temp.path(), [1u8, 0, 0]).unwrap();
    assert!(Metadata::load_from_file(temp.path()).is_err());
}
