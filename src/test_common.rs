use crate::{
    datamodels::maker::*,
    references::RefType,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Write one placeholder reference file of every type into `dir`, named
/// `<reftype>.asdf`, to fit an exposure of shape `(ngroups, ny, nx)`.
pub fn write_reference_set(
    dir: &Path,
    (ngroups, ny, nx): (usize, usize, usize),
) -> BTreeMap<RefType, PathBuf> {
    let path_of = |reftype: RefType| dir.join(format!("{}.asdf", reftype.name()));
    save(mk_dark((ngroups, ny, nx)), path_of(RefType::Dark)).unwrap();
    save(mk_flat((ny, nx)), path_of(RefType::Flat)).unwrap();
    save(mk_gain((ny, nx)), path_of(RefType::Gain)).unwrap();
    save(mk_linearity((3, ny, nx)), path_of(RefType::Linearity)).unwrap();
    save(mk_mask((ny, nx)), path_of(RefType::Mask)).unwrap();
    save(mk_readnoise((ny, nx)), path_of(RefType::ReadNoise)).unwrap();
    save(mk_saturation((ny, nx)), path_of(RefType::Saturation)).unwrap();
    RefType::ALL
        .into_iter()
        .map(|reftype| (reftype, path_of(reftype)))
        .collect()
}
