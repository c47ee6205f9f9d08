//! Typed view of the PhysiCell settings document.
//!
//! The settings XML is parsed once at environment construction. Only the
//! fields the environment, the render callback and the simulations need are
//! extracted; everything else in the document is ignored.

use std::{collections::BTreeMap, fs, path::Path, str::FromStr};

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    error::{ConfigError, IoError, PhysiGymResult},
    sim::ParamValue,
};

/// Spatial domain of the simulation, read from `//domain`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub use_2d: bool,
}

impl Domain {
    pub fn x_range(&self) -> (f64, f64) {
        (self.x_min, self.x_max)
    }

    pub fn y_range(&self) -> (f64, f64) {
        (self.y_min, self.y_max)
    }

    /// Voxel centres along one axis, from `min + d/2` up to `max`.
    pub fn voxel_centers(min: f64, max: f64, d: f64) -> Vec<f64> {
        if d <= 0.0 || max <= min {
            return Vec::new();
        }
        let n = ((max - min) / d).round().max(1.0) as usize;
        (0..n).map(|i| min + d * (i as f64 + 0.5)).collect()
    }
}

/// Declared type of a `//user_parameters/*` entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ParamType {
    Int,
    Double,
    Bool,
    String,
}

/// Custom data declared on a cell definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CustomData {
    Scalar(f64),
    Vector(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDefinition {
    pub name: String,
    pub id: u32,
    pub custom_data: BTreeMap<String, CustomData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub domain: Domain,
    pub max_time: f64,
    pub dt_gym: f64,
    /// `None` means the document asks for a system-chosen seed.
    pub random_seed: Option<u64>,
    pub save_folder: String,
    pub substrates: Vec<String>,
    pub cell_definitions: Vec<CellDefinition>,
    pub user_parameters: BTreeMap<String, ParamValue>,
}

impl Settings {
    pub fn from_path(path: impl AsRef<Path>) -> PhysiGymResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            IoError::ReadFailed(format!("Failed to read settings {}: {e}", path.display()))
        })?;
        Ok(text.parse()?)
    }

    pub fn is_user_parameter(&self, label: &str) -> bool {
        self.user_parameters.contains_key(label)
    }

    /// Looks a label up in the custom data of every cell definition.
    pub fn custom_data(&self, label: &str) -> Option<&CustomData> {
        self.cell_definitions
            .iter()
            .find_map(|def| def.custom_data.get(label))
    }

    pub fn cell_type_name(&self, id: u32) -> Option<&str> {
        self.cell_definitions
            .iter()
            .find(|def| def.id == id)
            .map(|def| def.name.as_str())
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let doc = Document::parse(s)?;
        let root = doc.root_element();

        let domain = Domain {
            x_min: required_f64(root, "domain/x_min")?,
            x_max: required_f64(root, "domain/x_max")?,
            y_min: required_f64(root, "domain/y_min")?,
            y_max: required_f64(root, "domain/y_max")?,
            z_min: required_f64(root, "domain/z_min")?,
            z_max: required_f64(root, "domain/z_max")?,
            dx: required_f64(root, "domain/dx")?,
            dy: required_f64(root, "domain/dy")?,
            dz: required_f64(root, "domain/dz")?,
            use_2d: text_at(root, "domain/use_2D")
                .map(|v| parse_bool("domain/use_2D", v))
                .transpose()?
                .unwrap_or(true),
        };

        let user_parameters = user_parameters(root)?;

        let dt_gym = match user_parameters.get("dt_gym") {
            Some(value) => value.as_f64().ok_or_else(|| ConfigError::InvalidValue {
                field: "user_parameters/dt_gym".to_string(),
                value: value.to_string(),
            })?,
            None => required_f64(root, "save/full_data/interval")?,
        };
        if dt_gym <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "dt_gym".to_string(),
                value: dt_gym.to_string(),
            });
        }

        let random_seed = match user_parameters.get("random_seed") {
            Some(value) => seed_from_text("user_parameters/random_seed", &value.to_string())?,
            None => text_at(root, "options/random_seed")
                .map(|v| seed_from_text("options/random_seed", v))
                .transpose()?
                .flatten(),
        };

        let substrates = root
            .descendants()
            .filter(|n| n.has_tag_name("microenvironment_setup"))
            .flat_map(|setup| setup.children().filter(|n| n.has_tag_name("variable")))
            .filter_map(|n| n.attribute("name").map(str::to_string))
            .collect();

        Ok(Self {
            domain,
            max_time: required_f64(root, "overall/max_time")?,
            dt_gym,
            random_seed,
            save_folder: text_at(root, "save/folder").unwrap_or("output").to_string(),
            substrates,
            cell_definitions: cell_definitions(root)?,
            user_parameters,
        })
    }
}

// ================================================================================================
// Helper Functions
// ================================================================================================

/// Resolves `a/b/c` like the XPath `//a/b/c`: the first descendant named `a`,
/// then element children along the remaining segments.
fn find_path<'a, 'input>(root: Node<'a, 'input>, path: &str) -> Option<Node<'a, 'input>> {
    let mut segments = path.split('/');
    let first = segments.next()?;
    let mut node = root.descendants().find(|n| n.has_tag_name(first))?;
    for segment in segments {
        node = node.children().find(|n| n.has_tag_name(segment))?;
    }
    Some(node)
}

fn text_at<'a>(root: Node<'a, '_>, path: &str) -> Option<&'a str> {
    find_path(root, path)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn required_f64(root: Node<'_, '_>, path: &str) -> Result<f64, ConfigError> {
    let text = text_at(root, path).ok_or_else(|| ConfigError::MissingField(path.to_string()))?;
    text.parse::<f64>().map_err(|_| ConfigError::InvalidValue {
        field: path.to_string(),
        value: text.to_string(),
    })
}

fn parse_bool(field: &str, text: &str) -> Result<bool, ConfigError> {
    match text.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: text.to_string(),
        }),
    }
}

fn seed_from_text(field: &str, text: &str) -> Result<Option<u64>, ConfigError> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("system") || text.is_empty() {
        return Ok(None);
    }
    text.parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            value: text.to_string(),
        })
}

fn user_parameters(root: Node<'_, '_>) -> Result<BTreeMap<String, ParamValue>, ConfigError> {
    let Some(params) = root.descendants().find(|n| n.has_tag_name("user_parameters")) else {
        return Ok(BTreeMap::new());
    };

    let mut out = BTreeMap::new();
    for node in params.children().filter(Node::is_element) {
        let name = node.tag_name().name().to_string();
        let text = node.text().map(str::trim).unwrap_or_default();
        let kind = node
            .attribute("type")
            .map(ParamType::from_str)
            .transpose()?
            .unwrap_or(ParamType::Double);

        let value = match kind {
            ParamType::Int => ParamValue::Int(text.parse::<i64>()?),
            ParamType::Double => ParamValue::Real(text.parse::<f64>()?),
            ParamType::Bool => ParamValue::Bool(parse_bool(&name, text)?),
            ParamType::String => ParamValue::Text(text.to_string()),
        };
        out.insert(name, value);
    }
    Ok(out)
}

fn cell_definitions(root: Node<'_, '_>) -> Result<Vec<CellDefinition>, ConfigError> {
    let mut out = Vec::new();
    for (idx, def) in root
        .descendants()
        .filter(|n| n.has_tag_name("cell_definition"))
        .enumerate()
    {
        let name = def
            .attribute("name")
            .ok_or_else(|| ConfigError::MissingField("cell_definition/@name".to_string()))?
            .to_string();
        let id = def
            .attribute("ID")
            .map(str::parse::<u32>)
            .transpose()?
            .unwrap_or(idx as u32);

        let mut custom_data = BTreeMap::new();
        if let Some(data) = def.children().find(|n| n.has_tag_name("custom_data")) {
            for node in data.children().filter(Node::is_element) {
                let label = node.tag_name().name().to_string();
                let text = node.text().map(str::trim).unwrap_or_default();
                let value = if text.contains(',') {
                    let values = text
                        .split(',')
                        .map(|v| v.trim().parse::<f64>())
                        .collect::<Result<Vec<_>, _>>()?;
                    CustomData::Vector(values)
                } else {
                    CustomData::Scalar(text.parse::<f64>()?)
                };
                custom_data.insert(label, value);
            }
        }

        out.push(CellDefinition {
            name,
            id,
            custom_data,
        });
    }
    Ok(out)
}
