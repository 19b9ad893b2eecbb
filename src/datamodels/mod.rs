//! Schema-backed data models.
//!
//! Every model is a typed record (`meta` plus arrays) that converts to and
//! from an untyped [`Node`] tree. Trees are validated against the embedded
//! schemas whenever a model is written, and when it is read unless
//! [`ReadOptions::validate_on_read`] is off.

pub mod array;
pub mod dqflags;
pub mod error;
pub mod maker;
pub mod meta;
pub mod models;
pub mod node;
pub mod registry;
pub mod schema;

pub use array::{DType, NdArray};
pub use error::ModelError;
pub use meta::{Meta, RefMeta, StepStatus};
pub use models::{
    open, open_as, promote, AnyModel, DarkRefModel, DataModel, FlatRefModel, GainRefModel,
    ImageModel, LinearityRefModel, MaskRefModel, RampModel, ReadOptions, ReadnoiseRefModel,
    SaturationRefModel, ScienceRawModel,
};
pub use node::Node;
pub use registry::ModelType;
pub use schema::{validate, ValidationError};

#[cfg(test)]
mod tests {
    use super::{maker::*, *};
    use crate::io::asdf::{read_asdf, write_asdf};
    use ndarray::{Array2, Array3};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_ramp_round_trip() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("ramp.asdf");

        let mut ramp = mk_ramp((4, 5, 6));
        ramp.data = Array3::from_shape_fn((4, 5, 6), |(g, y, x)| (g * 100 + y * 10 + x) as f32);
        ramp.pixeldq[[1, 2]] = dqflags::DEAD;
        ramp.groupdq[[3, 1, 1]] = dqflags::group::SATURATED;
        ramp.meta.cal_step.dq_init = StepStatus::Complete;
        ramp.write_to(&path).unwrap();

        let read = RampModel::open(&path, &ReadOptions::default()).unwrap();
        assert_eq!(read, ramp);
    }

    #[test]
    fn test_every_model_round_trips() {
        let tmp_dir = tempdir().unwrap();
        let models = vec![
            mk_level1_science_raw((2, 3, 4)).into_any(),
            mk_ramp((2, 3, 4)).into_any(),
            mk_level2_image((3, 4)).into_any(),
            mk_dark((2, 3, 4)).into_any(),
            mk_flat((3, 4)).into_any(),
            mk_gain((3, 4)).into_any(),
            mk_linearity((2, 3, 4)).into_any(),
            mk_mask((3, 4)).into_any(),
            mk_readnoise((3, 4)).into_any(),
            mk_saturation((3, 4)).into_any(),
        ];
        for model in models {
            let path = tmp_dir.path().join(format!("{}.asdf", model.class_name()));
            model.write_to(&path).unwrap();
            let read = open(&path, &ReadOptions::default()).unwrap();
            assert_eq!(read.model_type(), model.model_type());
            assert_eq!(read, model);
        }
    }

    #[test]
    fn test_model_type_rewritten_on_write() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("image.asdf");
        let mut image = mk_level2_image((2, 2));
        image.meta.model_type = "SomethingElse".into();
        image.write_to(&path).unwrap();

        let read = ImageModel::open(&path, &ReadOptions::default()).unwrap();
        assert_eq!(read.meta.model_type, "ImageModel");
    }

    #[test]
    fn test_invalid_model_is_not_written() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("bad.asdf");
        let mut ramp = mk_ramp((2, 2, 2));
        ramp.meta.telescope = "NOTROMAN".into();

        match ramp.write_to(&path) {
            Err(ModelError::Validation(err)) => assert_eq!(err.path, "roman.meta.telescope"),
            other => panic!("expected a validation error, got {other:?}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_validate_on_read() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("mangled.asdf");
        mk_ramp((2, 2, 2)).write_to(&path).unwrap();

        // corrupt the telescope in place, keeping the file length
        let mut bytes = fs::read(&path).unwrap();
        let needle = b"telescope: ROMAN";
        let position = bytes
            .windows(needle.len())
            .position(|window| window == needle)
            .unwrap();
        bytes[position + "telescope: ".len()] = b'X';
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            open(&path, &ReadOptions::default()),
            Err(ModelError::Validation(_))
        ));

        let ramp = RampModel::open(
            &path,
            &ReadOptions {
                validate_on_read: false,
            },
        )
        .unwrap();
        assert_eq!(ramp.meta.telescope, "XOMAN");
    }

    #[test]
    fn test_open_as_wrong_type() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("flat.asdf");
        mk_flat((2, 2)).write_to(&path).unwrap();

        assert!(matches!(
            open_as::<MaskRefModel, _>(&path, &ReadOptions::default()),
            Err(ModelError::WrongModelType {
                expected: "MaskRefModel",
                found: "FlatRefModel"
            })
        ));
        let flat: FlatRefModel = open_as(&path, &ReadOptions::default()).unwrap();
        assert_eq!(flat.meta.instrument.optical_element.as_deref(), Some("F158"));
    }

    #[test]
    fn test_unknown_tag() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("guide.asdf");
        let tree = mk_ramp((1, 1, 1)).into_node().unwrap();
        write_asdf(
            &path,
            "asdf://stsci.edu/datamodels/roman/tags/guidewindow-1.0.0",
            &tree,
        )
        .unwrap();
        assert!(matches!(
            open(&path, &ReadOptions::default()),
            Err(ModelError::UnknownTag { .. })
        ));
    }

    #[test]
    fn test_wrong_array_dtype_fails_validation() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("ramp.asdf");
        let mut tree = mk_ramp((2, 2, 2)).into_node().unwrap();
        *tree.get_path_mut("pixeldq").unwrap() = Array2::<u16>::zeros((2, 2)).into();
        write_asdf(&path, &ModelType::Ramp.tag_uri(), &tree).unwrap();

        match open(&path, &ReadOptions::default()) {
            Err(ModelError::Validation(err)) => assert_eq!(err.path, "roman.pixeldq"),
            other => panic!("expected a validation error, got {other:?}"),
        }
        // without validation, decoding still catches the dtype
        assert!(matches!(
            open(
                &path,
                &ReadOptions {
                    validate_on_read: false
                }
            ),
            Err(ModelError::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("gain.asdf");
        let mut tree = mk_gain((2, 2)).into_node().unwrap();
        tree.as_map_mut()
            .unwrap()
            .insert("notes".into(), "hand made".into());
        write_asdf(&path, &ModelType::Gain.tag_uri(), &tree).unwrap();

        let file = read_asdf(&path).unwrap();
        assert!(file.tree.get_path("notes").is_some());
        let gain = GainRefModel::open(&path, &ReadOptions::default()).unwrap();
        assert_eq!(gain, mk_gain((2, 2)));
    }

    #[test]
    fn test_promote_level1_to_ramp() {
        let mut raw = mk_level1_science_raw((3, 4, 5));
        raw.data.fill(1200);
        raw.data[[2, 3, 4]] = 65535;
        raw.meta.instrument.detector = "WFI07".into();

        let ramp = promote(raw.clone().into_any(), mk_ramp((3, 4, 5))).unwrap();

        assert_eq!(ramp.meta.model_type, "RampModel");
        assert_eq!(ramp.meta.instrument.detector, "WFI07");
        assert_eq!(ramp.data.dim(), (3, 4, 5));
        assert_eq!(ramp.data[[0, 0, 0]], 1200.);
        assert_eq!(ramp.data[[2, 3, 4]], 65535.);
        // arrays the input lacks keep their defaults
        assert_eq!(ramp.pixeldq, Array2::<u32>::zeros((4, 5)));
        assert_eq!(ramp.groupdq, Array3::<u8>::zeros((3, 4, 5)));
        ramp.validate().unwrap();
    }
}
