//! Simulated stand-ins for the well-known modules the built-in policies
//! target. Each draws entropy at import exactly the way the real module is
//! known to, so the policies can be exercised end to end.

use crate::config::types::{Result, SandboxError};
use crate::core::state::SandboxState;
use crate::entropy::primitives::{default_rng, random_name, secure_random_bytes, seeded_rng};
use crate::module::object::{ModuleHandle, Value};
use crate::patch::builtin::{
    NUMPY_RANDOM, NUMPY_RANDOM_MTRAND, PYDANTIC_CORE, RANDOM, RANDOM_IMPORT_DRAWS, TEMPFILE,
};
use crate::testing::fixtures::{ScriptedLoader, StaticResolver};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};

pub const TIKTOKEN: &str = "tiktoken";

/// Names served by [`well_known_resolver`]
pub const WELL_KNOWN_MODULES: &[&str] = &[
    RANDOM,
    NUMPY_RANDOM,
    NUMPY_RANDOM_MTRAND,
    TEMPFILE,
    PYDANTIC_CORE,
    TIKTOKEN,
];

/// Resolver serving every simulated well-known module
pub fn well_known_resolver(state: &Arc<SandboxState>) -> StaticResolver {
    let s = Arc::clone(state);
    let random = ScriptedLoader::new(move |module| exec_random(&s, module));
    let s = Arc::clone(state);
    let numpy_random = ScriptedLoader::new(move |module| exec_numpy_random(&s, module));
    let s = Arc::clone(state);
    let mtrand = ScriptedLoader::new(move |module| exec_mtrand(&s, module));
    let s = Arc::clone(state);
    let tempfile = ScriptedLoader::new(move |module| exec_tempfile(&s, module));
    let s = Arc::clone(state);
    let pydantic = ScriptedLoader::new(move |module| exec_pydantic_core(&s, module));
    let s = Arc::clone(state);
    let tiktoken = ScriptedLoader::new(move |module| exec_tiktoken(&s, module));

    StaticResolver::new()
        .with_loader(RANDOM, random)
        .with_loader(NUMPY_RANDOM, numpy_random)
        .with_loader(NUMPY_RANDOM_MTRAND, mtrand)
        .with_loader(TEMPFILE, tempfile)
        .with_loader(PYDANTIC_CORE, pydantic)
        .with_loader(TIKTOKEN, tiktoken)
}

type SharedRng = Arc<Mutex<StdRng>>;

fn next_float(rng: &SharedRng) -> Value {
    json!(rng.lock().unwrap_or_else(PoisonError::into_inner).gen::<f64>())
}

fn seed_arg(args: &[Value]) -> Option<u64> {
    args.first().and_then(Value::as_u64)
}

/// Hidden generator seeded from ten draws; module functions share it
fn exec_random(state: &Arc<SandboxState>, module: &ModuleHandle) -> Result<()> {
    let seed_material = (0..RANDOM_IMPORT_DRAWS)
        .map(|_| secure_random_bytes(state, 4))
        .collect::<Result<Vec<_>>>()?;
    let seed = seed_material
        .iter()
        .flatten()
        .fold(0u64, |acc, b| acc.rotate_left(8) ^ u64::from(*b));
    let inst: SharedRng = Arc::new(Mutex::new(seeded_rng(seed)));

    module.set("BPF", json!(53));

    let rng = Arc::clone(&inst);
    module.set_function("random", move |_| Ok(next_float(&rng)));

    let rng = Arc::clone(&inst);
    let s = Arc::clone(state);
    module.set_function("seed", move |args| {
        let fresh = match seed_arg(args) {
            Some(seed) => seeded_rng(seed),
            None => default_rng(&s)?,
        };
        *rng.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(Value::Null)
    });

    let s = Arc::clone(state);
    module.set_function("Random", move |args| {
        let mut rng = match seed_arg(args) {
            Some(seed) => seeded_rng(seed),
            None => default_rng(&s)?,
        };
        Ok(json!(rng.gen::<f64>()))
    });

    // Constructing SystemRandom is free; using it draws entropy.
    module.set_function("SystemRandom", |_| Ok(json!("SystemRandom")));
    Ok(())
}

fn exec_numpy_random(state: &Arc<SandboxState>, module: &ModuleHandle) -> Result<()> {
    let s = Arc::clone(state);
    module.set_function("default_rng", move |args| {
        let mut rng = match seed_arg(args) {
            Some(seed) => seeded_rng(seed),
            None => default_rng(&s)?,
        };
        Ok(json!(rng.gen::<f64>()))
    });

    // Legacy global functions share one lazily seeded generator.
    let legacy: Arc<Mutex<Option<StdRng>>> = Arc::new(Mutex::new(None));
    let s = Arc::clone(state);
    module.set_function("random", move |_| {
        let mut slot = legacy.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rng = match slot.take() {
            Some(rng) => rng,
            None => default_rng(&s)?,
        };
        let value = rng.gen::<f64>();
        *slot = Some(rng);
        Ok(json!(value))
    });
    Ok(())
}

fn exec_mtrand(state: &Arc<SandboxState>, module: &ModuleHandle) -> Result<()> {
    let inst: SharedRng = Arc::new(Mutex::new(default_rng(state)?));

    let rng = Arc::clone(&inst);
    module.set_function("rand", move |_| Ok(next_float(&rng)));

    let s = Arc::clone(state);
    module.set_function("seed", move |_| {
        *inst.lock().unwrap_or_else(PoisonError::into_inner) = default_rng(&s)?;
        Ok(Value::Null)
    });
    Ok(())
}

fn exec_tempfile(state: &Arc<SandboxState>, module: &ModuleHandle) -> Result<()> {
    let s = Arc::clone(state);
    module.set_function("_RandomNameSequence", move |_| Ok(Value::String(random_name(&s)?)));

    let weak = Arc::downgrade(module);
    module.set_function("mktemp", move |_| {
        let module = weak
            .upgrade()
            .ok_or_else(|| SandboxError::ModuleNotFound(TEMPFILE.to_string()))?;
        let name = module.call("_RandomNameSequence", &[])?;
        Ok(json!(format!("/tmp/tmp{}", name.as_str().unwrap_or_default())))
    });
    module.set("tempdir", json!("/tmp"));
    Ok(())
}

fn exec_pydantic_core(state: &Arc<SandboxState>, module: &ModuleHandle) -> Result<()> {
    // Hash-map seed for the core schema cache
    secure_random_bytes(state, 16)?;

    let s = Arc::clone(state);
    module.set_function("validate_core_schema", move |args| {
        secure_random_bytes(&s, 16)?;
        match args.first() {
            Some(schema) if !schema.is_null() => Ok(schema.clone()),
            _ => Err(SandboxError::ModuleExec {
                module: PYDANTIC_CORE.to_string(),
                message: "SchemaError: invalid schema".to_string(),
            }),
        }
    });
    Ok(())
}

fn exec_tiktoken(state: &Arc<SandboxState>, module: &ModuleHandle) -> Result<()> {
    secure_random_bytes(state, 16)?;
    module.set_function("encode", |args| {
        let text = args.first().and_then(Value::as_str).unwrap_or_default();
        Ok(json!(text.split_whitespace().count()))
    });
    Ok(())
}
