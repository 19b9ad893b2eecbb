//! Constructors for schema-valid models filled with placeholder values.
//!
//! These are the templates steps promote into, and the fixtures used in tests.

use super::{
    error::ModelError,
    meta::{
        Aperture, CalStep, Exposure, Meta, Observation, RefFile, RefInstrument, RefMeta, WfiMode,
    },
    models::{
        DarkRefModel, DataModel, FlatRefModel, GainRefModel, ImageModel, LinearityRefModel,
        MaskRefModel, RampModel, ReadnoiseRefModel, SaturationRefModel, ScienceRawModel,
    },
};
use crate::references::RefType;
use hifitime::{Epoch, Unit};
use ndarray::{s, Array2, Array3};
use std::path::Path;

/// Seconds per frame of the WFI readout.
pub const FRAME_TIME: f64 = 3.04;
/// Frames averaged into each resultant by the placeholder MA table.
pub const NFRAMES: u32 = 8;

fn after(start: Epoch, seconds: f64) -> Epoch {
    // whole milliseconds
    start + Unit::Millisecond * (seconds * 1000.0).round() as i64
}

/// Placeholder exposure timing for `ngroups` resultants.
pub fn mk_exposure(ngroups: usize) -> Exposure {
    let start_time = Epoch::from_gregorian_utc_at_midnight(2020, 2, 1);
    let group_time = FRAME_TIME * NFRAMES as f64;
    let exposure_time = group_time * ngroups as f64;
    Exposure {
        exposure_type: "WFI_IMAGE".into(),
        start_time,
        mid_time: after(start_time, exposure_time / 2.0),
        end_time: after(start_time, exposure_time),
        ngroups: ngroups as u32,
        nframes: NFRAMES,
        frame_time: FRAME_TIME,
        group_time,
        exposure_time,
        ma_table_name: "High Latitude Imaging Survey".into(),
    }
}

/// Placeholder exposure metadata for `ngroups` resultants.
pub fn mk_meta(ngroups: usize) -> Meta {
    Meta {
        calibration_software_version: env!("CARGO_PKG_VERSION").into(),
        filename: "dummy.asdf".into(),
        file_date: Epoch::from_gregorian_utc_at_midnight(2020, 1, 1),
        model_type: String::new(),
        origin: "STSCI".into(),
        telescope: "ROMAN".into(),
        aperture: Aperture {
            name: "WFI_CEN".into(),
            position_angle: 120.0,
        },
        cal_step: CalStep::default(),
        exposure: mk_exposure(ngroups),
        instrument: WfiMode {
            name: "WFI".into(),
            detector: "WFI01".into(),
            optical_element: "F158".into(),
        },
        observation: Observation {
            obs_id: "r0000101001001001001_01101".into(),
            visit_id: "r0000101001001001001".into(),
            program: "00001".into(),
            execution_plan: 1,
            pass: 1,
            segment: 1,
            observation: 1,
            visit: 1,
            exposure: 1,
        },
        ref_file: RefFile::default(),
    }
}

/// Placeholder reference file metadata. Only reference types that depend on
/// the optical element get one.
pub fn mk_ref_meta(reftype: RefType) -> RefMeta {
    RefMeta {
        reftype: reftype.keyword().into(),
        pedigree: "DUMMY".into(),
        description: format!("Placeholder {} reference file", reftype.name()),
        author: "romancal".into(),
        useafter: Epoch::from_gregorian_utc_at_midnight(2020, 1, 1),
        telescope: "ROMAN".into(),
        origin: "STSCI".into(),
        instrument: RefInstrument {
            name: "WFI".into(),
            detector: "WFI01".into(),
            optical_element: if reftype.depends_on_optical_element() {
                Some("F158".into())
            } else {
                None
            },
        },
    }
}

/// A level 1 exposure of `(ngroups, ny, nx)` zeros.
pub fn mk_level1_science_raw(shape: (usize, usize, usize)) -> ScienceRawModel {
    let mut meta = mk_meta(shape.0);
    meta.model_type = "ScienceRawModel".into();
    ScienceRawModel {
        meta,
        data: Array3::zeros(shape),
    }
}

/// A ramp of `(ngroups, ny, nx)` zeros with no flags set.
pub fn mk_ramp(shape: (usize, usize, usize)) -> RampModel {
    let mut meta = mk_meta(shape.0);
    meta.model_type = "RampModel".into();
    RampModel {
        meta,
        data: Array3::zeros(shape),
        pixeldq: Array2::zeros((shape.1, shape.2)),
        groupdq: Array3::zeros(shape),
        err: Array3::zeros(shape),
    }
}

/// A level 2 image of `(ny, nx)` zeros.
pub fn mk_level2_image(shape: (usize, usize)) -> ImageModel {
    let mut meta = mk_meta(1);
    meta.model_type = "ImageModel".into();
    ImageModel {
        meta,
        data: Array2::zeros(shape),
        dq: Array2::zeros(shape),
        err: Array2::zeros(shape),
        var_poisson: Array2::zeros(shape),
        var_rnoise: Array2::zeros(shape),
    }
}

/// A dark of `(ngroups, ny, nx)` zeros.
pub fn mk_dark(shape: (usize, usize, usize)) -> DarkRefModel {
    DarkRefModel {
        meta: mk_ref_meta(RefType::Dark),
        data: Array3::zeros(shape),
        dq: Array2::zeros((shape.1, shape.2)),
        err: Array3::zeros(shape),
    }
}

/// A flat of ones.
pub fn mk_flat(shape: (usize, usize)) -> FlatRefModel {
    FlatRefModel {
        meta: mk_ref_meta(RefType::Flat),
        data: Array2::ones(shape),
        dq: Array2::zeros(shape),
        err: Array2::zeros(shape),
    }
}

/// A gain of one electron per DN.
pub fn mk_gain(shape: (usize, usize)) -> GainRefModel {
    GainRefModel {
        meta: mk_ref_meta(RefType::Gain),
        data: Array2::ones(shape),
    }
}

/// Identity linearity coefficients `(ncoeffs, ny, nx)`.
pub fn mk_linearity(shape: (usize, usize, usize)) -> LinearityRefModel {
    let mut coeffs = Array3::zeros(shape);
    if shape.0 > 1 {
        coeffs.slice_mut(s![1, .., ..]).fill(1.0);
    }
    LinearityRefModel {
        meta: mk_ref_meta(RefType::Linearity),
        coeffs,
        dq: Array2::zeros((shape.1, shape.2)),
    }
}

/// A mask with no flags set.
pub fn mk_mask(shape: (usize, usize)) -> MaskRefModel {
    MaskRefModel {
        meta: mk_ref_meta(RefType::Mask),
        dq: Array2::zeros(shape),
    }
}

/// A read noise of one DN.
pub fn mk_readnoise(shape: (usize, usize)) -> ReadnoiseRefModel {
    ReadnoiseRefModel {
        meta: mk_ref_meta(RefType::ReadNoise),
        data: Array2::ones(shape),
    }
}

/// Saturation at 60000 DN.
pub fn mk_saturation(shape: (usize, usize)) -> SaturationRefModel {
    SaturationRefModel {
        meta: mk_ref_meta(RefType::Saturation),
        data: Array2::from_elem(shape, 60000.0),
        dq: Array2::zeros(shape),
    }
}

/// Write a freshly made model to `path`, handing it back.
///
/// # Errors
///
/// see [`DataModel::write_to`]
pub fn save<M: DataModel, P: AsRef<Path>>(model: M, path: P) -> Result<M, ModelError> {
    model.write_to(path)?;
    Ok(model)
}
