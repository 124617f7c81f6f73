//! Sandboxed EJS execution.
//!
//! Every call to [`TemplateEngine::render`] builds a fresh `boa_engine`
//! context, installs the host `fs`/`path` shims, loads the patched EJS
//! bundle, binds the data payload and returns the rendered markup. Nothing
//! survives the call, so concurrent renders on different threads cannot
//! observe each other's bindings.

use boa_engine::object::builtins::JsArray;
use boa_engine::{js_string, Context, JsError, JsObject, JsString, JsValue, Source};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::{Error, Result};

mod patch;
mod shims;
pub mod value;

pub use value::{DataMap, DataValue, HostFunction};

/// Limits applied to each sandbox
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Maximum include nesting. Self-including templates fail here instead
    /// of recursing forever; sibling includes do not add up.
    pub max_include_depth: usize,
    /// Maximum number of files read through the `fs` shim per render
    pub max_include_reads: usize,
    /// Refuse filesystem access outside the template root
    pub confine_to_root: bool,
    /// Maximum loop iterations before the interpreter throws (0 => disabled)
    pub loop_iteration_limit: u64,
    /// Maximum call depth before the interpreter throws (usize::MAX => disabled)
    pub recursion_limit: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            max_include_depth: 64,
            max_include_reads: 10_000,
            confine_to_root: true,
            loop_iteration_limit: 1_000_000,
            recursion_limit: 1024,
        }
    }
}

/// Where the template text comes from
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    /// Inline template text
    Text(String),
    /// A template file; its directory is the default include root
    File(PathBuf),
}

impl TemplateSource {
    /// Build from the optional field pair used by configuration files and the
    /// CLI. Exactly one of the two must be present.
    pub fn from_parts(text: Option<String>, path: Option<PathBuf>) -> Result<Self> {
        match (text, path) {
            (Some(text), None) => Ok(TemplateSource::Text(text)),
            (None, Some(path)) => Ok(TemplateSource::File(path)),
            (Some(_), Some(_)) => Err(Error::ConfigError(
                "both template_text and template_path are set; choose one".into(),
            )),
            (None, None) => Err(Error::ConfigError("no template source given".into())),
        }
    }
}

/// A template plus the data it is rendered against
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: TemplateSource,
    pub data: DataMap,
    /// Include-resolution root. Defaults to the template file's directory.
    pub root: Option<PathBuf>,
}

impl RenderRequest {
    pub fn new(source: TemplateSource) -> Self {
        Self { source, data: DataMap::new(), root: None }
    }

    pub fn text(template: impl Into<String>) -> Self {
        Self::new(TemplateSource::Text(template.into()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(TemplateSource::File(path.into()))
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.data = data;
        self
    }

    /// Add a single binding to the template scope
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Use a serializable struct or map as the template scope
    pub fn with_serialized<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self> {
        match DataValue::from_serialize(data)? {
            DataValue::Object(map) => {
                self.data = map;
                Ok(self)
            }
            DataValue::Null => Ok(self),
            _ => Err(Error::ConfigError("template data must serialize to a map".into())),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }
}

/// Renders EJS templates in an isolated interpreter per call
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    config: TemplateConfig,
}

impl TemplateEngine {
    pub fn new(config: TemplateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// Render a template to markup
    pub fn render(&self, request: &RenderRequest) -> Result<String> {
        let (template, filename) = load_source(&request.source)?;
        let root = request
            .root
            .clone()
            .or_else(|| filename.as_deref().and_then(Path::parent).map(Path::to_path_buf));
        let sandbox = Rc::new(shims::SandboxFs::new(root.as_deref(), &self.config)?);

        let mut ctx = Context::default();
        if self.config.loop_iteration_limit > 0 {
            ctx.runtime_limits_mut()
                .set_loop_iteration_limit(self.config.loop_iteration_limit);
        }
        if self.config.recursion_limit < usize::MAX {
            ctx.runtime_limits_mut().set_recursion_limit(self.config.recursion_limit);
        }

        let ejs = load_library(&mut ctx, Rc::clone(&sandbox))?;
        let render = ejs
            .get(js_string!("render"), &mut ctx)
            .map_err(|e| init_error("reading ejs.render", e))?;
        let render = render
            .as_callable()
            .cloned()
            .ok_or_else(|| Error::SandboxInitError("ejs.render is not a function".into()))?;

        let data = value::map_to_js(&request.data, &mut ctx)
            .map_err(|e| Error::TemplateError(format!("failed to bind template data: {}", e)))?;
        let options = render_options(&mut ctx, filename.as_deref(), sandbox.root())
            .map_err(|e| init_error("building render options", e))?;

        log::debug!(
            "rendering {} template ({} bytes, {} bindings)",
            if filename.is_some() { "file" } else { "inline" },
            template.len(),
            request.data.len()
        );

        let args = [
            JsValue::from(JsString::from(template.as_str())),
            JsValue::from(data),
            JsValue::from(options),
        ];
        let output = render
            .call(&JsValue::from(ejs), &args, &mut ctx)
            .map_err(|e| Error::TemplateError(describe(&e, &mut ctx)))?;
        // Lone surrogates cannot be represented in a `String`; they become U+FFFD.
        let markup = output
            .to_string(&mut ctx)
            .map_err(|e| Error::TemplateError(describe(&e, &mut ctx)))?
            .to_std_string_lossy();

        log::trace!("template rendered {} bytes, {} include reads", markup.len(), sandbox.reads());
        Ok(markup)
    }
}

fn load_source(source: &TemplateSource) -> Result<(String, Option<PathBuf>)> {
    match source {
        TemplateSource::Text(text) => Ok((text.clone(), None)),
        TemplateSource::File(path) => {
            let canonical = fs::canonicalize(path).map_err(|e| {
                Error::ConfigError(format!("template file {} is not accessible: {}", path.display(), e))
            })?;
            let text = fs::read_to_string(&canonical).map_err(|e| {
                Error::ConfigError(format!("template file {} could not be read: {}", path.display(), e))
            })?;
            Ok((text, Some(canonical)))
        }
    }
}

/// Install the shims, then evaluate the patched library and the include
/// hooks. Returns the library's `ejs` object.
fn load_library(ctx: &mut Context, sandbox: Rc<shims::SandboxFs>) -> Result<JsObject> {
    shims::install(ctx, sandbox).map_err(|e| init_error("installing module shims", e))?;

    let library = patch::patch_library(patch::LIBRARY_SOURCE)?;
    ctx.eval(Source::from_bytes(library.as_bytes()))
        .map_err(|e| init_error("loading template library", e))?;
    ctx.eval(Source::from_bytes(patch::INCLUDE_HOOKS.as_bytes()))
        .map_err(|e| init_error("installing include hooks", e))?;

    let ejs = ctx
        .global_object()
        .get(js_string!("ejs"), ctx)
        .map_err(|e| init_error("reading ejs", e))?;
    ejs.as_object()
        .cloned()
        .ok_or_else(|| Error::SandboxInitError("template library did not define `ejs`".into()))
}

fn render_options(ctx: &mut Context, filename: Option<&Path>, root: Option<&Path>) -> boa_engine::JsResult<JsObject> {
    let options = JsObject::with_object_proto(ctx.intrinsics());
    if let Some(filename) = filename {
        let filename = JsString::from(filename.to_string_lossy().as_ref());
        options.set(js_string!("filename"), filename, true, ctx)?;
    } else if let Some(root) = root {
        let root = JsValue::from(JsString::from(root.to_string_lossy().as_ref()));
        let views = JsArray::from_iter([root], ctx);
        options.set(js_string!("views"), views, true, ctx)?;
    }
    Ok(options)
}

fn init_error(stage: &str, err: JsError) -> Error {
    Error::SandboxInitError(format!("{}: {}", stage, err))
}

/// Best-effort message extraction: thrown `Error` objects keep their
/// `message` (which EJS prefixes with file and line context).
fn describe(err: &JsError, ctx: &mut Context) -> String {
    match err.try_native(ctx) {
        Ok(native) => native.to_string(),
        Err(_) => err.to_string(),
    }
}
