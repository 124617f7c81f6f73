//! Adapter that wires the bundled EJS build to the host filesystem shim.
//!
//! The standalone EJS bundle replaces Node's `fs` with an empty module-table
//! entry. We rewrite that one entry so it re-exports the sandbox's
//! `native-fs` module. This is the only place that knows the bundle layout;
//! if the signature moves (a different EJS build), rendering fails fast
//! instead of running templates without include support.

use crate::{Error, Result};

/// The bundled template library
pub(crate) const LIBRARY_SOURCE: &str = include_str!("../assets/ejs.js");

const PATCH_TARGET: &str = "1:[function(require,module,exports){";
const PATCH_INJECTION: &str = "module.exports=require('native-fs');";

/// Replaces the library's include resolution with one built on the sandbox
/// `path` module, trying an implicit `.ejs` extension. Every compiled
/// template is wrapped so the host sees each frame enter and leave, which
/// is what bounds include depth.
pub(crate) const INCLUDE_HOOKS: &str = r#"
(function (ejs, path, fs, enter, leave) {
    ejs.resolveInclude = function (name, filename, isDir) {
        var base = isDir ? filename : path.dirname(filename);
        var resolved = path.resolve(base, name);
        if (!fs.existsSync(resolved) && !path.extname(name)) {
            var withExt = resolved + '.ejs';
            if (fs.existsSync(withExt)) {
                return withExt;
            }
        }
        return resolved;
    };

    var compile = ejs.compile;
    ejs.compile = function (template, opts) {
        var fn = compile.apply(this, arguments);
        var name = (opts && opts.filename) || '<inline>';
        return function () {
            enter(name);
            try {
                return fn.apply(this, arguments);
            } finally {
                leave();
            }
        };
    };
})(ejs, require('path'), require('native-fs'), __ejspdf_enter_template, __ejspdf_leave_template);
"#;

/// Redirect the library's filesystem module to `native-fs`.
pub(crate) fn patch_library(source: &str) -> Result<String> {
    let Some(pos) = source.find(PATCH_TARGET) else {
        return Err(Error::SandboxInitError(
            "library patch target not found: the bundled template library does not declare its \
             filesystem module where expected (library version mismatch?)"
                .into(),
        ));
    };

    let split = pos + PATCH_TARGET.len();
    let mut patched = String::with_capacity(source.len() + PATCH_INJECTION.len());
    patched.push_str(&source[..split]);
    patched.push_str(PATCH_INJECTION);
    patched.push_str(&source[split..]);
    Ok(patched)
}
