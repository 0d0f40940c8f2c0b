//! Template evaluation.

use anyhow::{bail, Context as _, Result};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::context::{is_truthy, Context};
use super::parser::{self, Arg, Cond, Expr, Node};

/// Nested includes deeper than this are treated as a cycle.
const MAX_INCLUDE_DEPTH: usize = 16;

/// A parsed template, remembering where it came from so relative includes
/// resolve against its directory.
#[derive(Debug, Clone)]
pub struct Template {
    origin: PathBuf,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str, origin: &Path) -> Result<Self> {
        let nodes = parser::parse(source)
            .with_context(|| format!("Failed to parse template {}", origin.display()))?;
        Ok(Self {
            origin: origin.to_path_buf(),
            nodes,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read template {}", path.display()))?;
        Self::parse(&source, path)
    }

    pub fn render(&self, ctx: &Context) -> Result<String> {
        let mut out = String::new();
        self.render_nodes(&self.nodes, ctx, &mut out, 0)?;
        Ok(out)
    }

    fn render_nodes(&self, nodes: &[Node], ctx: &Context, out: &mut String, depth: usize) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Expr(expr) => self.render_expr(expr, ctx, out, depth)?,
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let body = branches
                        .iter()
                        .find(|(cond, _)| eval(cond, ctx))
                        .map(|(_, body)| body)
                        .unwrap_or(otherwise);
                    self.render_nodes(body, ctx, out, depth)?;
                }
                Node::For { var, key, body } => {
                    let items = match ctx.get(key) {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Sequence(seq)) => seq.clone(),
                        Some(other) => vec![other.clone()],
                    };
                    for item in items {
                        let scope = ctx.with([(var.clone(), item)]);
                        self.render_nodes(body, &scope, out, depth)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn render_expr(&self, expr: &Expr, ctx: &Context, out: &mut String, depth: usize) -> Result<()> {
        match expr {
            Expr::Var(key) => out.push_str(&ctx.get_or(key, "")),
            Expr::Get { key, default } => out.push_str(&ctx.get_or(key, default)),
            Expr::Format {
                key,
                pattern,
                fallback,
            } => out.push_str(&ctx.format(key, pattern, fallback)),
            Expr::Include { path, bindings } => {
                if depth >= MAX_INCLUDE_DEPTH {
                    bail!(
                        "include depth exceeded in {} (include cycle?)",
                        self.origin.display()
                    );
                }
                let base = self.origin.parent().unwrap_or_else(|| Path::new("."));
                let included = Template::load(&base.join(path))?;
                let overrides = bindings.iter().map(|(name, arg)| {
                    let value = match arg {
                        Arg::Str(s) => Value::String(s.clone()),
                        Arg::Key(k) => ctx.get(k).cloned().unwrap_or(Value::Null),
                    };
                    (name.clone(), value)
                });
                let scope = ctx.with(overrides);
                included.render_nodes(&included.nodes, &scope, out, depth + 1)?;
            }
        }
        Ok(())
    }
}

fn eval(cond: &Cond, ctx: &Context) -> bool {
    match cond {
        Cond::Truthy(key) => ctx.get(key).map(is_truthy).unwrap_or(false),
        Cond::Set(key) => ctx.is_set(key),
        Cond::Not(inner) => !eval(inner, ctx),
    }
}

/// Render one template file to a string.
pub fn render_file(src: &Path, ctx: &Context) -> Result<String> {
    Template::load(src)?.render(ctx)
}

/// Render `src` against `ctx` and write the result to `dst`.
pub fn write_file(src: &Path, dst: &Path, ctx: &Context) -> Result<()> {
    let text = render_file(src, ctx)?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(dst, text).with_context(|| format!("Failed to write {}", dst.display()))?;
    tracing::debug!("rendered {} -> {}", src.display(), dst.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx() -> Context {
        let mut ctx = Context::new();
        ctx.insert("arch", "amd64");
        ctx.insert("build", true);
        ctx.insert(
            "features",
            Value::Sequence(vec!["buildpkg".into(), "parallel-fetch".into()]),
        );
        ctx
    }

    fn render(src: &str) -> String {
        Template::parse(src, Path::new("inline.tmpl"))
            .unwrap()
            .render(&ctx())
            .unwrap()
    }

    #[test]
    fn test_missing_variable_renders_empty() {
        assert_eq!(render("[{{ nothing }}]"), "[]");
    }

    #[test]
    fn test_conditionals() {
        let src = "{% if build %}B{% else %}N{% end %}{% if set qemu %}Q{% end %}";
        assert_eq!(render(src), "B");
    }

    #[test]
    fn test_for_loop() {
        let src = "{% for f in features %}<{{ f }}>{% end %}";
        assert_eq!(render(src), "<buildpkg><parallel-fetch>");
    }

    #[test]
    fn test_format_with_fallback() {
        assert_eq!(
            render("{{ format arch \"ARCH=%s\" \"none\" }} {{ format qemu \"Q=%s\" \"none\" }}"),
            "ARCH=amd64 none"
        );
    }

    #[test]
    fn test_include_with_overrides() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("part.tmpl"), "{{ arch }}/{{ extra }}").unwrap();
        let main = dir.path().join("main.tmpl");
        fs::write(&main, "{{ include \"part.tmpl\" extra=\"x\" }} {{ include \"part.tmpl\" arch=\"arm64\" }}").unwrap();

        assert_eq!(render_file(&main, &ctx()).unwrap(), "amd64/x arm64/");
    }

    #[test]
    fn test_include_cycle_is_an_error() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("loop.tmpl");
        fs::write(&main, "{{ include \"loop.tmpl\" }}").unwrap();
        assert!(render_file(&main, &ctx()).is_err());
    }
}
