//! Stand-in library bundles and helpers shared by the unit tests.

use crate::loader::{Asset, AssetKind};

/// Minimal stand-in for `katex.min.js`: echoes the formula, honours
/// `displayMode`, `macros` and `throwOnError`, and rejects `\bad`.
pub(crate) const FAKE_KATEX: &str = r#"
var katex = {
  renderToString: function (tex, opts) {
    if (tex.indexOf("\\bad") >= 0) {
      if (opts && opts.throwOnError === false) {
        return '<span class="katex-error">' + tex + '</span>';
      }
      throw new Error("KaTeX parse error: Undefined control sequence: \\bad");
    }
    if (opts && opts.macros) {
      for (var name in opts.macros) { tex = tex.split(name).join(opts.macros[name]); }
    }
    var mode = opts && opts.displayMode ? "display" : "inline";
    return '<span class="katex ' + mode + '">' + tex + '</span>';
  }
};
"#;

/// Stand-in for `contrib/auto-render.min.js`.
pub(crate) const FAKE_AUTO_RENDER: &str =
    "var renderMathInElement = function (el, opts) { return el; };";

/// Stand-in for `tex-mml-chtml.js`: keeps the configuration it found and
/// turns formulas into `<math>` elements. Like the real library, the entry
/// points only appear once its start-up promise has resolved.
pub(crate) const FAKE_MATHJAX: &str = r#"
var MathJax = (function (config) {
  var api = { config: config };
  var startup = function () {
    api.tex2mml = function (tex, opts) {
      if (tex.indexOf("\\bad") >= 0) { throw new Error("TeX error: Undefined control sequence \\bad"); }
      var macros = config.tex.macros;
      for (var name in macros) { tex = tex.split("\\" + name).join(macros[name]); }
      var display = opts && opts.display ? "block" : "inline";
      return '<math display="' + display + '">' + tex + '</math>';
    };
    api.typesetPromise = function () { return Promise.resolve(); };
    api.inlineCount = function () { return String(config.tex.inlineMath.length); };
  };
  if (typeof Promise === "undefined") { startup(); } else { Promise.resolve().then(startup); }
  return api;
})(MathJax);
"#;

pub(crate) fn script(url: &str, body: &str) -> Asset {
    Asset {
        url: url.to_owned(),
        kind: AssetKind::Script,
        body: body.to_owned(),
    }
}
