use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use rhai::{Dynamic, Engine, Scope, AST};

use crate::executor::{UpdateCallback, UpdateContext};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScriptRequest {
    Unregister(String),
}

/// Update callback backed by a compiled Rhai script.
///
/// Each tick calls the script's `update(dt)`; scripts without one are a no-op. Optional
/// `create()` and `destroy()` functions back the lifecycle hooks. `print` output is
/// captured and `unregister(id)` is forwarded to the scheduler's deferred command queue.
pub struct ScriptBehaviour {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    logs: Rc<RefCell<Vec<String>>>,
    requests: Rc<RefCell<Vec<ScriptRequest>>>,
    label: String,
    has_create: bool,
    has_update: bool,
    has_destroy: bool,
}

impl ScriptBehaviour {
    pub fn compile(label: impl Into<String>, source: &str) -> Result<Self> {
        let label = label.into();
        let logs = Rc::new(RefCell::new(Vec::new()));
        let requests = Rc::new(RefCell::new(Vec::new()));
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        register_api(&mut engine, &logs, &requests, &label);
        let ast = engine.compile(source).with_context(|| format!("Compiling Rhai script '{label}'"))?;
        let has_create = declares(&ast, &label, "create", 0)?;
        let has_update = declares(&ast, &label, "update", 1)?;
        let has_destroy = declares(&ast, &label, "destroy", 0)?;
        Ok(Self {
            engine,
            ast,
            scope: Scope::new(),
            logs,
            requests,
            label,
            has_create,
            has_update,
            has_destroy,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::compile(path.display().to_string(), &source)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Shared handle to the captured log lines, usable after the behaviour is boxed.
    pub fn log_sink(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.logs)
    }

    pub fn take_logs(&mut self) -> Vec<String> {
        self.logs.borrow_mut().drain(..).collect()
    }
}

impl ScriptBehaviour {
    fn call_hook(&mut self, ctx: &mut UpdateContext<'_>, name: &str, args: impl rhai::FuncArgs) -> Result<()> {
        let outcome = self.engine.call_fn::<Dynamic>(&mut self.scope, &self.ast, name, args);
        for request in self.requests.borrow_mut().drain(..) {
            match request {
                ScriptRequest::Unregister(id) => ctx.commands().unregister(id),
            }
        }
        outcome.map(|_| ()).map_err(|err| anyhow!("{err}")).with_context(|| format!("script '{}'", self.label))
    }
}

impl UpdateCallback for ScriptBehaviour {
    fn on_create(&mut self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        if !self.has_create {
            return Ok(());
        }
        self.call_hook(ctx, "create", ())
    }

    fn update(&mut self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        if !self.has_update {
            return Ok(());
        }
        let dt = ctx.delta_seconds() as rhai::FLOAT;
        self.call_hook(ctx, "update", (dt,))
    }

    fn on_destroy(&mut self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        if !self.has_destroy {
            return Ok(());
        }
        self.call_hook(ctx, "destroy", ())
    }
}

/// Whether the script defines `name` with `arity` parameters. Defining it only with
/// other arities is an error, since the hook would otherwise never run.
fn declares(ast: &AST, label: &str, name: &str, arity: usize) -> Result<bool> {
    let mut other_arity = false;
    for function in ast.iter_functions().filter(|function| function.name == name) {
        if function.params.len() == arity {
            return Ok(true);
        }
        other_arity = true;
    }
    if other_arity {
        bail!("Rhai script '{label}': `{name}` must take {arity} parameter(s)");
    }
    Ok(false)
}

fn register_api(
    engine: &mut Engine,
    logs: &Rc<RefCell<Vec<String>>>,
    requests: &Rc<RefCell<Vec<ScriptRequest>>>,
    label: &str,
) {
    let sink = Rc::clone(logs);
    let prefix = label.to_string();
    engine.on_print(move |text| sink.borrow_mut().push(format!("[{prefix}] {text}")));

    let queue = Rc::clone(requests);
    engine.register_fn("unregister", move |id: &str| {
        queue.borrow_mut().push(ScriptRequest::Unregister(id.to_string()));
    });
}
