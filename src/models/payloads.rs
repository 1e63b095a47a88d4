use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ipc::Action;

/// Renderer selected by the initialization payload.
///
/// A closed set: unknown renderer names fall back to the stock Maya software
/// renderer, matching the worker-side handler lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renderer {
    MayaSoftware,
    Arnold,
    VRay,
    Renderman,
}

impl Renderer {
    pub fn from_name(name: &str) -> Self {
        match name {
            "arnold" => Self::Arnold,
            "vray" => Self::VRay,
            "renderman" => Self::Renderman,
            _ => Self::MayaSoftware,
        }
    }
}

/// Initialization payload for a render session.
///
/// This type is the declared schema: deserializing it validates the payload.
/// `renderer`, `scene_file` and `project_path` are required; everything else
/// is optional and unknown keys are ignored rather than forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitData {
    pub renderer: String,
    pub scene_file: Utf8PathBuf,
    pub project_path: Utf8PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_height: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_path: Option<Utf8PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_layer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_setup_include_lights: Option<bool>,

    /// Treat generic Exception/Error/Warning output lines as fatal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_error_checking: Option<bool>,

    /// Treat arnold's abort-on-license-fail marker as fatal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_on_arnold_license_fail: Option<bool>,

    /// Maya major version, used to select the worker executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl InitData {
    /// Validate a raw payload against this schema.
    pub fn validate(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    pub fn renderer_kind(&self) -> Renderer {
        Renderer::from_name(&self.renderer)
    }

    pub fn strict_error_checking(&self) -> bool {
        self.strict_error_checking.unwrap_or(false)
    }

    pub fn error_on_arnold_license_fail(&self) -> bool {
        self.error_on_arnold_license_fail.unwrap_or(false)
    }

    /// Build the ordered initialization actions for the worker.
    ///
    /// `scene_file` and `project_path` must be applied before any other
    /// setting, so they are emitted first; the remaining recognized keys
    /// follow, each only when present. The `renderer` and `path_mapping`
    /// actions are enqueued separately ahead of all of these.
    pub fn init_actions(&self) -> Vec<Action> {
        let mut actions = vec![
            Action::with_value("scene_file", "scene_file", json!(self.scene_file)),
            Action::with_value("project_path", "project_path", json!(self.project_path)),
        ];

        let optional: [(&str, Option<Value>); 9] = [
            ("animation", self.animation.map(Value::from)),
            ("camera", self.camera.clone().map(Value::from)),
            ("image_height", self.image_height.map(Value::from)),
            ("image_width", self.image_width.map(Value::from)),
            (
                "output_file_path",
                self.output_file_path.as_ref().map(|p| json!(p)),
            ),
            (
                "output_file_prefix",
                self.output_file_prefix.clone().map(Value::from),
            ),
            ("render_layer", self.render_layer.clone().map(Value::from)),
            (
                "render_setup_include_lights",
                self.render_setup_include_lights.map(Value::from),
            ),
            (
                "error_on_arnold_license_fail",
                self.error_on_arnold_license_fail.map(Value::from),
            ),
        ];

        for (name, value) in optional {
            if let Some(value) = value {
                actions.push(Action::with_value(name, name, value));
            }
        }

        actions
    }
}

/// Per-task payload: the frame to render, optionally with a crop region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunData {
    pub frame: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_min_x: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_max_x: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_min_y: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_max_y: Option<i64>,
}

impl RunData {
    /// Validate a raw payload against this schema.
    pub fn validate(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// The `start_render` action carrying this payload.
    pub fn start_render_action(&self) -> Action {
        let payload = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        Action::new("start_render", payload)
    }
}
