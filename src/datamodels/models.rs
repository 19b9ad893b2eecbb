//! Typed data models, and dispatch over all of them.

use super::{
    error::ModelError,
    meta::{Meta, ModelMeta, RefMeta},
    node::{merge_into, Map, Node},
    registry::ModelType,
    schema::validate,
};
use crate::io::asdf::{read_asdf, write_asdf, AsdfFile};
use log::{debug, trace};
use ndarray::{Array, Ix2, Ix3};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

/// Options for opening model files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Validate the tree against the model's schema before decoding it
    pub validate_on_read: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            validate_on_read: true,
        }
    }
}

/// A schema-backed model with typed metadata and arrays.
pub trait DataModel: Sized + Clone + Send + Sync {
    /// The metadata record of this model.
    type Meta: ModelMeta + Serialize + DeserializeOwned;

    /// Which kind of model this is.
    const MODEL_TYPE: ModelType;

    /// The metadata.
    fn meta(&self) -> &Self::Meta;

    /// The metadata, mutably.
    fn meta_mut(&mut self) -> &mut Self::Meta;

    /// Shape of the primary array.
    fn shape(&self) -> Vec<usize>;

    /// Convert into an untyped tree, recording the class name in `meta.model_type`.
    ///
    /// # Errors
    ///
    /// Will return [`ModelError::Metadata`] if the metadata cannot be serialized.
    fn into_node(self) -> Result<Node, ModelError>;

    /// Decode an untyped tree. Fields the model does not define are ignored.
    ///
    /// # Errors
    ///
    /// Will return an error if a field is missing or has the wrong kind, dtype or dimensionality.
    fn from_node(node: Node) -> Result<Self, ModelError>;

    /// Wrap into an [`AnyModel`].
    fn into_any(self) -> AnyModel;

    /// Unwrap from an [`AnyModel`].
    ///
    /// # Errors
    ///
    /// Will return [`ModelError::WrongModelType`] if `model` is a different kind of model.
    fn from_any(model: AnyModel) -> Result<Self, ModelError>;

    /// A tree of a copy of this model.
    ///
    /// # Errors
    ///
    /// see [`DataModel::into_node`]
    fn to_node(&self) -> Result<Node, ModelError> {
        self.clone().into_node()
    }

    /// Validate against the model's schema.
    ///
    /// # Errors
    ///
    /// Will return [`ModelError::Validation`] if the model violates its schema.
    fn validate(&self) -> Result<(), ModelError> {
        validate(&self.to_node()?, &Self::MODEL_TYPE.schema_uri())?;
        Ok(())
    }

    /// Validate, then write to an ASDF file.
    ///
    /// # Errors
    ///
    /// - [`ModelError::Validation`] if the model violates its schema, in which case nothing is written
    /// - [`ModelError::IO`] if the file cannot be written
    fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let node = self.to_node()?;
        validate(&node, &Self::MODEL_TYPE.schema_uri())?;
        write_asdf(path.as_ref(), &Self::MODEL_TYPE.tag_uri(), &node)?;
        Ok(())
    }

    /// Open a file that must hold this kind of model.
    ///
    /// # Errors
    ///
    /// see [`open`]; also [`ModelError::WrongModelType`] for another kind of model.
    fn open<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Self, ModelError> {
        Self::from_any(open(path, options)?)
    }
}

fn take_field(map: &mut Map, model: &'static str, field: &str) -> Result<Node, ModelError> {
    map.remove(field).ok_or_else(|| ModelError::MissingField {
        model,
        field: field.to_string(),
    })
}

macro_rules! datamodel {
    (
        $(#[$attr:meta])*
        $name:ident($variant:ident, $meta:ty, shape = $primary:ident) {
            $( $(#[$fattr:meta])* $field:ident: $elem:ty, $dim:ty; )+
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            /// Metadata
            pub meta: $meta,
            $(
                $(#[$fattr])*
                pub $field: Array<$elem, $dim>,
            )+
        }

        impl DataModel for $name {
            type Meta = $meta;
            const MODEL_TYPE: ModelType = ModelType::$variant;

            fn meta(&self) -> &$meta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $meta {
                &mut self.meta
            }

            fn shape(&self) -> Vec<usize> {
                self.$primary.shape().to_vec()
            }

            fn into_node(mut self) -> Result<Node, ModelError> {
                self.meta.set_model_type(Self::MODEL_TYPE.class_name());
                let mut map = Map::new();
                map.insert("meta".to_string(), Node::from_serialize(&self.meta)?);
                $(
                    map.insert(stringify!($field).to_string(), Node::from(self.$field));
                )+
                Ok(Node::Map(map))
            }

            fn from_node(node: Node) -> Result<Self, ModelError> {
                let class_name = Self::MODEL_TYPE.class_name();
                let mut map = match node {
                    Node::Map(map) => map,
                    _ => {
                        return Err(ModelError::WrongNodeKind {
                            model: class_name,
                            field: "roman".into(),
                            expected: "an object",
                        })
                    }
                };
                let meta = take_field(&mut map, class_name, "meta")?.deserialize_into()?;
                $(
                    let $field = match take_field(&mut map, class_name, stringify!($field))? {
                        Node::Array(array) => array.into_typed::<$elem, $dim>(stringify!($field))?,
                        _ => {
                            return Err(ModelError::WrongNodeKind {
                                model: class_name,
                                field: stringify!($field).into(),
                                expected: "an ndarray",
                            })
                        }
                    };
                )+
                for key in map.keys() {
                    debug!("{class_name} ignores field {key}");
                }
                Ok(Self { meta, $( $field ),+ })
            }

            fn into_any(self) -> AnyModel {
                AnyModel::$variant(self)
            }

            fn from_any(model: AnyModel) -> Result<Self, ModelError> {
                match model {
                    AnyModel::$variant(model) => Ok(model),
                    other => Err(ModelError::WrongModelType {
                        expected: Self::MODEL_TYPE.class_name(),
                        found: other.class_name(),
                    }),
                }
            }
        }
    };
}

datamodel! {
    /// Level 1 uncalibrated resultants, `(ngroups, ny, nx)`.
    ScienceRawModel(ScienceRaw, Meta, shape = data) {
        data: u16, Ix3;
    }
}

datamodel! {
    /// Resultants with data quality, `(ngroups, ny, nx)`.
    RampModel(Ramp, Meta, shape = data) {
        data: f32, Ix3;
        /// flags that apply to every resultant of a pixel
        pixeldq: u32, Ix2;
        /// flags for individual resultants
        groupdq: u8, Ix3;
        err: f32, Ix3;
    }
}

datamodel! {
    /// Level 2 count rate image, `(ny, nx)`.
    ImageModel(Image, Meta, shape = data) {
        data: f32, Ix2;
        dq: u32, Ix2;
        err: f32, Ix2;
        var_poisson: f32, Ix2;
        var_rnoise: f32, Ix2;
    }
}

datamodel! {
    /// Dark current per resultant.
    DarkRefModel(Dark, RefMeta, shape = data) {
        data: f32, Ix3;
        dq: u32, Ix2;
        err: f32, Ix3;
    }
}

datamodel! {
    /// Flat field, normalised to one.
    FlatRefModel(Flat, RefMeta, shape = data) {
        data: f32, Ix2;
        dq: u32, Ix2;
        err: f32, Ix2;
    }
}

datamodel! {
    /// Gain in electrons per DN.
    GainRefModel(Gain, RefMeta, shape = data) {
        data: f32, Ix2;
    }
}

datamodel! {
    /// Polynomial coefficients `(ncoeffs, ny, nx)`, lowest order first.
    LinearityRefModel(Linearity, RefMeta, shape = coeffs) {
        coeffs: f32, Ix3;
        dq: u32, Ix2;
    }
}

datamodel! {
    /// Bad pixel mask.
    MaskRefModel(Mask, RefMeta, shape = dq) {
        dq: u32, Ix2;
    }
}

datamodel! {
    /// Read noise per pixel in DN.
    ReadnoiseRefModel(ReadNoise, RefMeta, shape = data) {
        data: f32, Ix2;
    }
}

datamodel! {
    /// Saturation thresholds in DN.
    SaturationRefModel(Saturation, RefMeta, shape = data) {
        data: f32, Ix2;
        dq: u32, Ix2;
    }
}

/// Any data model.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyModel {
    /// see [`ScienceRawModel`]
    ScienceRaw(ScienceRawModel),
    /// see [`RampModel`]
    Ramp(RampModel),
    /// see [`ImageModel`]
    Image(ImageModel),
    /// see [`DarkRefModel`]
    Dark(DarkRefModel),
    /// see [`FlatRefModel`]
    Flat(FlatRefModel),
    /// see [`GainRefModel`]
    Gain(GainRefModel),
    /// see [`LinearityRefModel`]
    Linearity(LinearityRefModel),
    /// see [`MaskRefModel`]
    Mask(MaskRefModel),
    /// see [`ReadnoiseRefModel`]
    ReadNoise(ReadnoiseRefModel),
    /// see [`SaturationRefModel`]
    Saturation(SaturationRefModel),
}

macro_rules! dispatch {
    ($model:expr, $inner:ident => $body:expr) => {
        match $model {
            AnyModel::ScienceRaw($inner) => $body,
            AnyModel::Ramp($inner) => $body,
            AnyModel::Image($inner) => $body,
            AnyModel::Dark($inner) => $body,
            AnyModel::Flat($inner) => $body,
            AnyModel::Gain($inner) => $body,
            AnyModel::Linearity($inner) => $body,
            AnyModel::Mask($inner) => $body,
            AnyModel::ReadNoise($inner) => $body,
            AnyModel::Saturation($inner) => $body,
        }
    };
}

impl AnyModel {
    /// Which kind of model this is.
    pub fn model_type(&self) -> ModelType {
        match self {
            AnyModel::ScienceRaw(_) => ModelType::ScienceRaw,
            AnyModel::Ramp(_) => ModelType::Ramp,
            AnyModel::Image(_) => ModelType::Image,
            AnyModel::Dark(_) => ModelType::Dark,
            AnyModel::Flat(_) => ModelType::Flat,
            AnyModel::Gain(_) => ModelType::Gain,
            AnyModel::Linearity(_) => ModelType::Linearity,
            AnyModel::Mask(_) => ModelType::Mask,
            AnyModel::ReadNoise(_) => ModelType::ReadNoise,
            AnyModel::Saturation(_) => ModelType::Saturation,
        }
    }

    /// The class name, e.g. `RampModel`.
    pub fn class_name(&self) -> &'static str {
        self.model_type().class_name()
    }

    /// Exposure metadata, for science models.
    pub fn science_meta(&self) -> Option<&Meta> {
        match self {
            AnyModel::ScienceRaw(model) => Some(&model.meta),
            AnyModel::Ramp(model) => Some(&model.meta),
            AnyModel::Image(model) => Some(&model.meta),
            _ => None,
        }
    }

    /// Exposure metadata, mutably, for science models.
    pub fn science_meta_mut(&mut self) -> Option<&mut Meta> {
        match self {
            AnyModel::ScienceRaw(model) => Some(&mut model.meta),
            AnyModel::Ramp(model) => Some(&mut model.meta),
            AnyModel::Image(model) => Some(&mut model.meta),
            _ => None,
        }
    }

    /// Reference metadata, for reference models.
    pub fn ref_meta(&self) -> Option<&RefMeta> {
        match self {
            AnyModel::ScienceRaw(_) | AnyModel::Ramp(_) | AnyModel::Image(_) => None,
            AnyModel::Dark(model) => Some(&model.meta),
            AnyModel::Flat(model) => Some(&model.meta),
            AnyModel::Gain(model) => Some(&model.meta),
            AnyModel::Linearity(model) => Some(&model.meta),
            AnyModel::Mask(model) => Some(&model.meta),
            AnyModel::ReadNoise(model) => Some(&model.meta),
            AnyModel::Saturation(model) => Some(&model.meta),
        }
    }

    /// Shape of the primary array.
    pub fn shape(&self) -> Vec<usize> {
        dispatch!(self, model => model.shape())
    }

    /// Convert into an untyped tree.
    ///
    /// # Errors
    ///
    /// see [`DataModel::into_node`]
    pub fn into_node(self) -> Result<Node, ModelError> {
        dispatch!(self, model => model.into_node())
    }

    /// Decode a tree as the given kind of model.
    ///
    /// # Errors
    ///
    /// see [`DataModel::from_node`]
    pub fn from_node(model_type: ModelType, node: Node) -> Result<Self, ModelError> {
        Ok(match model_type {
            ModelType::ScienceRaw => ScienceRawModel::from_node(node)?.into_any(),
            ModelType::Ramp => RampModel::from_node(node)?.into_any(),
            ModelType::Image => ImageModel::from_node(node)?.into_any(),
            ModelType::Dark => DarkRefModel::from_node(node)?.into_any(),
            ModelType::Flat => FlatRefModel::from_node(node)?.into_any(),
            ModelType::Gain => GainRefModel::from_node(node)?.into_any(),
            ModelType::Linearity => LinearityRefModel::from_node(node)?.into_any(),
            ModelType::Mask => MaskRefModel::from_node(node)?.into_any(),
            ModelType::ReadNoise => ReadnoiseRefModel::from_node(node)?.into_any(),
            ModelType::Saturation => SaturationRefModel::from_node(node)?.into_any(),
        })
    }

    /// Validate against the model's schema.
    ///
    /// # Errors
    ///
    /// see [`DataModel::validate`]
    pub fn validate(&self) -> Result<(), ModelError> {
        dispatch!(self, model => model.validate())
    }

    /// Validate, then write to an ASDF file.
    ///
    /// # Errors
    ///
    /// see [`DataModel::write_to`]
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        dispatch!(self, model => model.write_to(path))
    }
}

/// Open a model file of any kind, dispatching on its tag.
///
/// # Errors
///
/// - [`ModelError::IO`] if the file is not a readable ASDF file
/// - [`ModelError::UnknownTag`] / [`ModelError::UnsupportedVersion`] if the tag names no model
/// - [`ModelError::Validation`] if `options.validate_on_read` and the tree violates its schema
/// - decoding errors if the tree does not fit the model
pub fn open<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<AnyModel, ModelError> {
    let path = path.as_ref();
    trace!("opening {}", path.display());
    let AsdfFile { tag, tree } = read_asdf(path)?;
    let model_type = ModelType::from_tag(&tag)?;
    if options.validate_on_read {
        validate(&tree, &model_type.schema_uri())?;
    }
    AnyModel::from_node(model_type, tree)
}

/// Open a file that must hold a model of type `M`.
///
/// # Errors
///
/// see [`open`]; also [`ModelError::WrongModelType`] for another kind of model.
pub fn open_as<M: DataModel, P: AsRef<Path>>(
    path: P,
    options: &ReadOptions,
) -> Result<M, ModelError> {
    M::open(path, options)
}

/// Promote `input` into a model of type `M`, starting from `template`.
///
/// The input's top-level fields are merged into the template's tree with
/// [`merge_into`]: mappings are updated, arrays are cast to the template's
/// dtype, and everything else is replaced. `meta.model_type` is set to `M`'s
/// class name.
///
/// # Errors
///
/// Will return an error if the merged tree does not decode as an `M`.
pub fn promote<M: DataModel>(input: AnyModel, template: M) -> Result<M, ModelError> {
    debug!(
        "promoting {} to {}",
        input.class_name(),
        M::MODEL_TYPE.class_name()
    );
    let mut tree = template.into_node()?;
    merge_into(&mut tree, input.into_node()?)?;
    let mut model = M::from_node(tree)?;
    model.meta_mut().set_model_type(M::MODEL_TYPE.class_name());
    Ok(model)
}
