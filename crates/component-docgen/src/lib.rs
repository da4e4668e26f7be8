use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use docgen_spec::{
    DocxRenderer, EvaluationError, EvaluationReport, FieldMap, GenerationPolicy, GenerationReport,
    PackageError, Renderer, Template, TemplateDefinition, TemplateError, TemplateSummary,
    build_form_payload, evaluate, generate, package, render_json_ui, render_text,
};

pub const CHANNEL_LOAD_TEMPLATE: &str = "load-template";
pub const CHANNEL_EVALUATE_TEMPLATE: &str = "evaluate-template";
pub const CHANNEL_GENERATE_DOCUMENTS: &str = "generate-documents";
pub const CHANNEL_DESCRIBE_TEMPLATE: &str = "describe-template";

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("no template is loaded")]
    NoTemplate,
    #[error("failed to parse config: {0}")]
    ConfigParse(#[source] serde_json::Error),
    #[error("invalid `{channel}` request: {source}")]
    InvalidRequest {
        channel: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{0}` request needs either `fields` or `input`")]
    MissingParameter(&'static str),
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("json encode error: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error("invalid template: {0}")]
    Template(#[from] TemplateError),
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ComponentConfig {
    #[serde(default)]
    pub policy: GenerationPolicy,
}

impl ComponentConfig {
    pub fn from_json(config_json: &str) -> Result<Self, ComponentError> {
        if config_json.trim().is_empty() {
            Ok(Self::default())
        } else {
            serde_json::from_str(config_json).map_err(ComponentError::ConfigParse)
        }
    }
}

/// Result of [`Session::evaluate_and_generate`]. `generation` is `None` when the
/// policy refused to generate from an evaluation with errors.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub evaluation: EvaluationReport,
    pub generation: Option<GenerationReport>,
}

/// Holds the current template. Loading a new template replaces it atomically;
/// calls already running keep working on the template they started with.
pub struct Session {
    template: RwLock<Option<Arc<Template>>>,
    renderer: Arc<dyn Renderer>,
    policy: GenerationPolicy,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(GenerationPolicy::default())
    }
}

impl Session {
    pub fn new(policy: GenerationPolicy) -> Self {
        Self::with_renderer(policy, Arc::new(DocxRenderer))
    }

    pub fn with_renderer(policy: GenerationPolicy, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            template: RwLock::new(None),
            renderer,
            policy,
        }
    }

    pub fn from_config_json(config_json: &str) -> Result<Self, ComponentError> {
        Ok(Self::new(ComponentConfig::from_json(config_json)?.policy))
    }

    pub fn policy(&self) -> GenerationPolicy {
        self.policy
    }

    /// Installs `template` as the current template.
    pub fn load_template(&self, template: Template) -> TemplateSummary {
        let summary = template.summary();
        let template = Arc::new(template);
        *self
            .template
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(template);
        info!(template = %summary.name, fields = summary.fields.len(), "template loaded");
        summary
    }

    pub fn load_definition(
        &self,
        definition: &TemplateDefinition,
    ) -> Result<TemplateSummary, ComponentError> {
        Ok(self.load_template(Template::from_definition(definition)?))
    }

    /// Loads a package from a `.zip` file or directory.
    pub fn load_package(&self, path: &Path) -> Result<TemplateSummary, ComponentError> {
        Ok(self.load_template(package::open(path)?))
    }

    /// Snapshot of the current template.
    pub fn current(&self) -> Result<Arc<Template>, ComponentError> {
        self.template
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ComponentError::NoTemplate)
    }

    pub fn evaluate(&self, input: &Value) -> Result<EvaluationReport, ComponentError> {
        let template = self.current()?;
        Ok(evaluate(&template, input)?)
    }

    pub fn generate_documents(
        &self,
        fields: &FieldMap,
        out_dir: &Path,
    ) -> Result<GenerationReport, ComponentError> {
        let template = self.current()?;
        Ok(generate(&template, fields, out_dir, self.renderer.as_ref())?)
    }

    /// Evaluates `input` and generates documents when the policy allows it.
    pub fn evaluate_and_generate(
        &self,
        input: &Value,
        out_dir: &Path,
    ) -> Result<SessionOutcome, ComponentError> {
        let template = self.current()?;
        let evaluation = evaluate(&template, input)?;
        if !self.policy.permits(&evaluation) {
            info!(
                template = %template.name(),
                errors = evaluation.error_count,
                "input has errors, documents not generated"
            );
            return Ok(SessionOutcome {
                evaluation,
                generation: None,
            });
        }
        let generation = generate(&template, &evaluation.fields, out_dir, self.renderer.as_ref())?;
        Ok(SessionOutcome {
            evaluation,
            generation: Some(generation),
        })
    }

    /// Dispatches a JSON request for `channel`. Failures come back as `{"error": ...}`.
    pub fn handle(&self, channel: &str, payload_json: &str) -> String {
        debug!(channel, "handling request");
        respond(self.dispatch(channel, payload_json))
    }

    fn dispatch(&self, channel: &str, payload_json: &str) -> Result<Value, ComponentError> {
        match channel {
            CHANNEL_LOAD_TEMPLATE => {
                let summary = match parse_request(channel, payload_json)? {
                    LoadRequest::Package { path } => self.load_package(&path)?,
                    LoadRequest::Definition { definition } => self.load_definition(&definition)?,
                };
                encode(&summary)
            }
            CHANNEL_EVALUATE_TEMPLATE => {
                let request: EvaluateRequest = parse_request(channel, payload_json)?;
                encode(&self.evaluate(&request.input)?)
            }
            CHANNEL_GENERATE_DOCUMENTS => {
                let request: GenerateRequest = parse_request(channel, payload_json)?;
                match (request.fields, request.input) {
                    (Some(fields), _) => {
                        encode(&self.generate_documents(&fields, &request.out_dir)?)
                    }
                    (None, Some(input)) => {
                        encode(&self.evaluate_and_generate(&input, &request.out_dir)?)
                    }
                    (None, None) => Err(ComponentError::MissingParameter(
                        CHANNEL_GENERATE_DOCUMENTS,
                    )),
                }
            }
            CHANNEL_DESCRIBE_TEMPLATE => {
                let request: DescribeRequest = parse_request(channel, payload_json)?;
                let template = self.current()?;
                let report = request
                    .input
                    .map(|input| evaluate(&template, &input))
                    .transpose()?;
                let payload = build_form_payload(&template, report.as_ref());
                Ok(match request.format {
                    DescribeFormat::Json => render_json_ui(&payload),
                    DescribeFormat::Text => json!({ "text": render_text(&payload) }),
                })
            }
            other => Err(ComponentError::UnknownChannel(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LoadRequest {
    Package { path: PathBuf },
    Definition { definition: TemplateDefinition },
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    fields: Option<FieldMap>,
    #[serde(default)]
    input: Option<Value>,
    out_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DescribeFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Deserialize)]
struct DescribeRequest {
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    format: DescribeFormat,
}

fn parse_request<T>(channel: &str, payload_json: &str) -> Result<T, ComponentError>
where
    T: for<'de> Deserialize<'de>,
{
    let payload = if payload_json.trim().is_empty() {
        "{}"
    } else {
        payload_json
    };
    serde_json::from_str(payload).map_err(|source| ComponentError::InvalidRequest {
        channel: channel.to_string(),
        source,
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ComponentError> {
    serde_json::to_value(value).map_err(ComponentError::JsonEncode)
}

fn respond(result: Result<Value, ComponentError>) -> String {
    match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|error| {
            json!({"error": format!("json encode: {}", error)}).to_string()
        }),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}
