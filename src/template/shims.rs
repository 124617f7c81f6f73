//! Host-implemented `fs` and `path` modules for the template sandbox.
//!
//! The bundled template library expects a CommonJS `require`. Only two
//! modules are emulated: `fs` (also registered as `native-fs`, the name the
//! library patch redirects to) and `path`. Any other module name yields an
//! inert empty object and a debug-level notice.

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source,
};
use boa_gc::{Finalize, Trace};
use std::cell::Cell;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use super::TemplateConfig;
use crate::{Error, Result};

const REQUIRE_PRELUDE: &str = r#"
var require = (function (modules, notice) {
    return function require(name) {
        if (Object.prototype.hasOwnProperty.call(modules, name)) {
            return modules[name];
        }
        notice(String(name));
        return {};
    };
})(__ejspdf_modules, __ejspdf_unknown_module);
"#;

/// Filesystem view of one render call.
///
/// Tracks how deeply templates are currently nested, so self-referencing
/// includes terminate with an error, and how many files were read in total.
#[derive(Debug)]
pub(crate) struct SandboxFs {
    root: Option<PathBuf>,
    confine: bool,
    max_depth: usize,
    max_reads: usize,
    reads: Cell<usize>,
    depth: Cell<usize>,
}

impl SandboxFs {
    pub(crate) fn new(root: Option<&Path>, config: &TemplateConfig) -> Result<Self> {
        let root = root
            .map(|r| {
                fs::canonicalize(r).map_err(|e| {
                    Error::ConfigError(format!("template root {} is not accessible: {}", r.display(), e))
                })
            })
            .transpose()?;

        Ok(Self {
            root,
            confine: config.confine_to_root,
            max_depth: config.max_include_depth,
            max_reads: config.max_include_reads,
            reads: Cell::new(0),
            depth: Cell::new(0),
        })
    }

    pub(crate) fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Number of files read through the shim so far
    pub(crate) fn reads(&self) -> usize {
        self.reads.get()
    }

    /// Current template nesting; 0 outside any template
    pub(crate) fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Enter a template frame. The top-level template sits at include
    /// depth 0, each nested include one deeper.
    pub(crate) fn enter_template(&self, name: &str) -> std::result::Result<(), String> {
        let nesting = self.depth.get();
        if nesting > self.max_depth {
            return Err(format!("include depth limit of {} exceeded at {}", self.max_depth, name));
        }
        self.depth.set(nesting + 1);
        Ok(())
    }

    pub(crate) fn leave_template(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }

    fn check_access(&self, path: &str) -> std::result::Result<PathBuf, String> {
        let candidate = Path::new(path);
        if !self.confine {
            return Ok(candidate.to_path_buf());
        }
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| format!("{} (no template root configured)", path))?;
        let canonical = fs::canonicalize(candidate).map_err(|e| format!("{}: {}", path, e))?;
        if canonical.starts_with(root) {
            Ok(canonical)
        } else {
            Err(format!("{} is outside the template root", path))
        }
    }

    pub(crate) fn exists(&self, path: &str) -> bool {
        self.check_access(path).map(|p| p.exists()).unwrap_or(false)
    }

    pub(crate) fn read_to_string(&self, path: &str) -> std::result::Result<String, String> {
        let count = self.reads.get() + 1;
        self.reads.set(count);
        if count > self.max_reads {
            return Err(format!("include limit of {} file reads exceeded at {}", self.max_reads, path));
        }

        let target = self
            .check_access(path)
            .map_err(|reason| format!("include not found: {}", reason))?;
        log::trace!("sandbox read {}", target.display());
        fs::read_to_string(&target).map_err(|e| format!("include not found: {}: {}", path, e))
    }

    /// `path.resolve`: absolute segments restart the result, relative
    /// results are anchored at the root (or the working directory).
    pub(crate) fn resolve(&self, segments: &[String]) -> PathBuf {
        let mut resolved = PathBuf::new();
        for segment in segments.iter().filter(|s| !s.is_empty()) {
            resolved.push(segment);
        }
        if !resolved.is_absolute() {
            let base = match &self.root {
                Some(root) => root.clone(),
                None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            };
            resolved = base.join(resolved);
        }
        normalize(&resolved)
    }
}

/// Lexical `.`/`..` normalization (no filesystem access)
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_))) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// `path.join`
pub(crate) fn join(segments: &[String]) -> String {
    // Unlike resolve, absolute segments do not restart the result.
    let joined = segments
        .iter()
        .filter(|s| !s.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("/");
    let normalized = normalize(Path::new(&joined));
    if normalized.as_os_str().is_empty() {
        ".".to_string()
    } else {
        normalized.to_string_lossy().into_owned()
    }
}

/// `path.dirname`
pub(crate) fn dirname(path: &str) -> String {
    match Path::new(path).parent() {
        Some(parent) if parent.as_os_str().is_empty() => ".".to_string(),
        Some(parent) => parent.to_string_lossy().into_owned(),
        None if path.starts_with('/') => "/".to_string(),
        None => ".".to_string(),
    }
}

/// `path.extname`
pub(crate) fn extname(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

fn string_arg(args: &[JsValue], index: usize, ctx: &mut Context) -> JsResult<String> {
    match args.get(index) {
        Some(value) if !value.is_undefined() => Ok(value.to_string(ctx)?.to_std_string_lossy()),
        _ => Err(JsNativeError::typ()
            .with_message(format!("argument {} must be a string", index))
            .into()),
    }
}

fn string_args(args: &[JsValue], ctx: &mut Context) -> JsResult<Vec<String>> {
    (0..args.len()).map(|i| string_arg(args, i, ctx)).collect()
}

fn js_str(s: &str) -> JsValue {
    JsValue::from(JsString::from(s))
}

/// The per-render sandbox as seen by native functions. It holds no boa
/// values, so there is nothing for the collector to trace.
#[derive(Trace, Finalize)]
struct SandboxCapture(#[unsafe_ignore_trace] Rc<SandboxFs>);

type SandboxFn = fn(&JsValue, &[JsValue], &SandboxCapture, &mut Context) -> JsResult<JsValue>;

fn bound(f: SandboxFn, sandbox: &Rc<SandboxFs>) -> NativeFunction {
    NativeFunction::from_copy_closure_with_captures(f, SandboxCapture(Rc::clone(sandbox)))
}

fn read_file_sync(_this: &JsValue, args: &[JsValue], sandbox: &SandboxCapture, ctx: &mut Context) -> JsResult<JsValue> {
    let path = string_arg(args, 0, ctx)?;
    sandbox
        .0
        .read_to_string(&path)
        .map(|text| js_str(&text))
        .map_err(|message| JsNativeError::error().with_message(message).into())
}

fn exists_sync(_this: &JsValue, args: &[JsValue], sandbox: &SandboxCapture, ctx: &mut Context) -> JsResult<JsValue> {
    let path = string_arg(args, 0, ctx)?;
    Ok(JsValue::from(sandbox.0.exists(&path)))
}

fn path_resolve(_this: &JsValue, args: &[JsValue], sandbox: &SandboxCapture, ctx: &mut Context) -> JsResult<JsValue> {
    let segments = string_args(args, ctx)?;
    Ok(js_str(&sandbox.0.resolve(&segments).to_string_lossy()))
}

fn path_join(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    Ok(js_str(&join(&string_args(args, ctx)?)))
}

fn path_dirname(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    Ok(js_str(&dirname(&string_arg(args, 0, ctx)?)))
}

fn path_extname(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    Ok(js_str(&extname(&string_arg(args, 0, ctx)?)))
}

fn enter_template(_this: &JsValue, args: &[JsValue], sandbox: &SandboxCapture, ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, ctx)?;
    sandbox
        .0
        .enter_template(&name)
        .map(|()| JsValue::undefined())
        .map_err(|message| JsNativeError::error().with_message(message).into())
}

fn leave_template(_this: &JsValue, _args: &[JsValue], sandbox: &SandboxCapture, _ctx: &mut Context) -> JsResult<JsValue> {
    sandbox.0.leave_template();
    Ok(JsValue::undefined())
}

fn unknown_module_notice(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let name = args.first().map(|a| a.display().to_string()).unwrap_or_default();
    log::debug!("template sandbox requested unsupported module {:?}; returning an empty object", name);
    Ok(JsValue::undefined())
}

/// Install `fs`, `path`, the global `require` and the template frame hooks
/// (`__ejspdf_enter_template` / `__ejspdf_leave_template`) into a fresh
/// context.
pub(crate) fn install(ctx: &mut Context, sandbox: Rc<SandboxFs>) -> JsResult<()> {
    let fs_module = ObjectInitializer::new(ctx)
        .function(bound(read_file_sync, &sandbox), js_string!("readFileSync"), 2)
        .function(bound(exists_sync, &sandbox), js_string!("existsSync"), 1)
        .build();

    let path_module = ObjectInitializer::new(ctx)
        .function(bound(path_resolve, &sandbox), js_string!("resolve"), 0)
        .function(NativeFunction::from_fn_ptr(path_join), js_string!("join"), 0)
        .function(NativeFunction::from_fn_ptr(path_dirname), js_string!("dirname"), 1)
        .function(NativeFunction::from_fn_ptr(path_extname), js_string!("extname"), 1)
        .property(js_string!("sep"), js_str("/"), Attribute::READONLY)
        .build();

    let modules = ObjectInitializer::new(ctx)
        .property(js_string!("fs"), fs_module.clone(), Attribute::READONLY)
        .property(js_string!("native-fs"), fs_module, Attribute::READONLY)
        .property(js_string!("path"), path_module, Attribute::READONLY)
        .build();

    ctx.register_global_property(js_string!("__ejspdf_modules"), modules, Attribute::empty())?;
    ctx.register_global_builtin_callable(
        js_string!("__ejspdf_unknown_module"),
        1,
        NativeFunction::from_fn_ptr(unknown_module_notice),
    )?;
    ctx.register_global_builtin_callable(
        js_string!("__ejspdf_enter_template"),
        1,
        bound(enter_template, &sandbox),
    )?;
    ctx.register_global_builtin_callable(
        js_string!("__ejspdf_leave_template"),
        0,
        bound(leave_template, &sandbox),
    )?;
    ctx.eval(Source::from_bytes(REQUIRE_PRELUDE.as_bytes()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TemplateConfig {
        TemplateConfig::default()
    }

    #[test]
    fn path_helpers_follow_node_semantics() {
        assert_eq!(dirname("/srv/tpl/main.ejs"), "/srv/tpl");
        assert_eq!(dirname("main.ejs"), ".");
        assert_eq!(dirname("/"), "/");
        assert_eq!(extname("header.ejs"), ".ejs");
        assert_eq!(extname("partials/header"), "");
        assert_eq!(extname(".profile"), "");
        assert_eq!(join(&["a".into(), "b/../c".into(), "d.ejs".into()]), "a/c/d.ejs");
        assert_eq!(join(&["/a".into(), "/b".into()]), "/a/b");
        assert_eq!(join(&[]), ".");
    }

    #[test]
    fn normalize_is_lexical() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn resolve_anchors_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxFs::new(Some(dir.path()), &config()).unwrap();
        let root = sandbox.root().unwrap().to_path_buf();

        assert_eq!(sandbox.resolve(&["partials".into(), "x.ejs".into()]), root.join("partials/x.ejs"));
        assert_eq!(sandbox.resolve(&["/etc".into(), "hosts".into()]), PathBuf::from("/etc/hosts"));
        assert_eq!(sandbox.resolve(&["/a".into(), "../b".into()]), PathBuf::from("/b"));
    }

    #[test]
    fn reads_are_confined_to_the_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("templates");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("ok.ejs"), "inside").unwrap();
        fs::write(outer.path().join("secret.txt"), "outside").unwrap();

        let sandbox = SandboxFs::new(Some(&root), &config()).unwrap();
        let inside = root.join("ok.ejs");
        let escape = root.join("../secret.txt");

        assert!(sandbox.exists(&inside.to_string_lossy()));
        assert_eq!(sandbox.read_to_string(&inside.to_string_lossy()).unwrap(), "inside");

        assert!(!sandbox.exists(&escape.to_string_lossy()));
        let err = sandbox.read_to_string(&escape.to_string_lossy()).unwrap_err();
        assert!(err.contains("outside the template root"), "{}", err);
    }

    #[test]
    fn unconfined_sandbox_reads_anywhere() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("any.ejs");
        fs::write(&file, "free").unwrap();

        let cfg = TemplateConfig { confine_to_root: false, ..config() };
        let sandbox = SandboxFs::new(None, &cfg).unwrap();
        assert_eq!(sandbox.read_to_string(&file.to_string_lossy()).unwrap(), "free");
    }

    #[test]
    fn read_budget_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("row.ejs");
        fs::write(&file, "x").unwrap();

        let cfg = TemplateConfig { max_include_reads: 2, ..config() };
        let sandbox = SandboxFs::new(Some(dir.path()), &cfg).unwrap();
        let path = file.to_string_lossy();
        assert!(sandbox.read_to_string(&path).is_ok());
        assert!(sandbox.read_to_string(&path).is_ok());
        let err = sandbox.read_to_string(&path).unwrap_err();
        assert!(err.contains("include limit of 2 file reads"));
        assert_eq!(sandbox.reads(), 3);
    }

    #[test]
    fn depth_counts_open_frames_only() {
        let cfg = TemplateConfig { max_include_depth: 2, ..config() };
        let sandbox = SandboxFs::new(None, &cfg).unwrap();

        // siblings: enter/leave pairs never accumulate
        for _ in 0..100 {
            sandbox.enter_template("row").unwrap();
            sandbox.leave_template();
        }
        assert_eq!(sandbox.depth(), 0);

        sandbox.enter_template("main").unwrap();
        sandbox.enter_template("a").unwrap();
        sandbox.enter_template("b").unwrap();
        let err = sandbox.enter_template("c").unwrap_err();
        assert!(err.contains("include depth limit of 2 exceeded at c"), "{}", err);
        assert_eq!(sandbox.depth(), 3);

        sandbox.leave_template();
        sandbox.enter_template("c").unwrap();
    }

    #[test]
    fn missing_root_is_a_config_error() {
        let err = SandboxFs::new(Some(Path::new("/definitely/not/here")), &config()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn require_serves_known_modules_and_empty_objects() {
        let mut ctx = Context::default();
        let sandbox = Rc::new(SandboxFs::new(None, &config()).unwrap());
        install(&mut ctx, sandbox).unwrap();

        let out = ctx
            .eval(Source::from_bytes(
                "[typeof require('fs').readFileSync, require('native-fs') === require('fs'), \
                 require('path').extname('a.ejs'), Object.keys(require('child_process')).length].join('|')"
                    .as_bytes(),
            ))
            .unwrap();
        assert_eq!(
            out.to_string(&mut ctx).unwrap().to_std_string_escaped(),
            "function|true|.ejs|0"
        );
    }
}
