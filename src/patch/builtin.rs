//! Built-in policies for well-known modules that draw entropy at import.
//!
//! Policies act on modules through attribute names only:
//! - `random`: 10 draws at import, then everything except `Random` and
//!   `SystemRandom` is blocked; `seed()` is called before the first request.
//! - `numpy.random`: nothing drawn, everything except `default_rng` blocked.
//! - `numpy.random.mtrand`: 1 draw, everything blocked, reseeded later.
//! - `tempfile`: `_RandomNameSequence` swapped for a deterministic sequence
//!   and swapped back before the first request.
//! - `pydantic_core`: 1 draw at import plus 1 for the hash map built by
//!   `validate_core_schema`.
//! - other native packages (`tiktoken`, ...): 1 draw for the hash-map seed.

use crate::config::settings::SandboxConfig;
use crate::config::types::{Result, SandboxError};
use crate::entropy::primitives::DeterministicNameSequence;
use crate::module::facade::AllowList;
use crate::module::object::{Attribute, ModuleHandle, Value};
use crate::patch::registry::PatchRegistryBuilder;
use std::sync::{Mutex, PoisonError};

pub const RANDOM: &str = "random";
pub const NUMPY_RANDOM: &str = "numpy.random";
pub const NUMPY_RANDOM_MTRAND: &str = "numpy.random.mtrand";
pub const TEMPFILE: &str = "tempfile";
pub const PYDANTIC_CORE: &str = "pydantic_core";

/// Draws `random` makes while seeding itself at import
pub const RANDOM_IMPORT_DRAWS: u32 = 10;
/// Draws a native package makes to seed one hash map
pub const HASH_SEED_DRAWS: u32 = 1;

const NAME_SEQUENCE_ATTR: &str = "_RandomNameSequence";
const SAVED_NAME_SEQUENCE_ATTR: &str = "_orig_RandomNameSequence";

/// Register every built-in policy, honouring allowance overrides
pub fn register_builtin_policies(builder: &mut PatchRegistryBuilder, config: &SandboxConfig) {
    register_random(builder, config.allowance_for(RANDOM, RANDOM_IMPORT_DRAWS));
    register_numpy_random(builder);
    register_numpy_mtrand(builder, config.allowance_for(NUMPY_RANDOM_MTRAND, HASH_SEED_DRAWS));
    register_tempfile(builder);

    for package in &config.rust_packages {
        let draws = config.allowance_for(package, HASH_SEED_DRAWS);
        if package == PYDANTIC_CORE {
            register_pydantic_core(builder, draws);
        } else {
            register_rust_package(builder, package, draws);
        }
    }
}

fn register_random(builder: &mut PatchRegistryBuilder, draws: u32) {
    builder
        .on_execute(RANDOM, move |cx, module, exec| {
            cx.with_entropy_allowance(draws, || exec())?;
            // Seeded construction is fine; anything using the import-time
            // seed waits for the first request.
            cx.block_calls(module, ["Random", "SystemRandom"].into_iter().collect());
            Ok(())
        })
        .before_first_request(RANDOM, reseed);
}

fn register_numpy_random(builder: &mut PatchRegistryBuilder) {
    builder.on_execute(NUMPY_RANDOM, |cx, module, exec| {
        exec()?;
        cx.block_calls(module, ["default_rng"].into_iter().collect());
        Ok(())
    });
}

fn register_numpy_mtrand(builder: &mut PatchRegistryBuilder, draws: u32) {
    builder
        .on_execute(NUMPY_RANDOM_MTRAND, move |cx, module, exec| {
            cx.with_entropy_allowance(draws, || exec())?;
            cx.block_calls(module, AllowList::empty());
            Ok(())
        })
        .before_first_request(NUMPY_RANDOM_MTRAND, reseed);
}

fn register_tempfile(builder: &mut PatchRegistryBuilder) {
    builder
        .on_execute(TEMPFILE, |_cx, module, exec| {
            exec()?;
            install_deterministic_names(module);
            Ok(())
        })
        .before_first_request(TEMPFILE, |module| {
            restore_random_names(module);
            Ok(())
        });
}

fn register_pydantic_core(builder: &mut PatchRegistryBuilder, draws: u32) {
    builder.on_execute(PYDANTIC_CORE, move |cx, module, exec| {
        cx.with_entropy_allowance(draws, || exec())?;
        if !module.contains("validate_core_schema") {
            log::warn!("{} has no validate_core_schema; skipping hash seed draw", module.name());
            return Ok(());
        }

        // validate_core_schema builds a hash map (one more seed draw) and
        // then rejects the null schema; only the draw matters.
        cx.with_entropy_allowance(HASH_SEED_DRAWS, || {
            match module.call("validate_core_schema", &[Value::Null]) {
                Err(err) if is_schema_rejection(&err) => {
                    log::debug!("validate_core_schema(None) rejected as expected: {}", err);
                    Ok(())
                }
                other => other.map(|_| ()),
            }
        })
    });
}

fn is_schema_rejection(err: &SandboxError) -> bool {
    matches!(err, SandboxError::ModuleExec { message, .. } if message.starts_with("SchemaError"))
}

fn register_rust_package(builder: &mut PatchRegistryBuilder, name: &str, draws: u32) {
    builder.on_execute(name, move |cx, _module, exec| {
        cx.with_entropy_allowance(draws, || exec())
    });
}

fn reseed(module: &ModuleHandle) -> Result<()> {
    if !module.contains("seed") {
        log::debug!("{} has no seed(); nothing to reseed", module.name());
        return Ok(());
    }
    module.call("seed", &[])?;
    log::info!("Reseeded {} from live entropy", module.name());
    Ok(())
}

fn install_deterministic_names(module: &ModuleHandle) {
    let original = match module.remove(NAME_SEQUENCE_ATTR) {
        Some(original) => original,
        None => {
            log::debug!("{} has no {}; leaving names alone", module.name(), NAME_SEQUENCE_ATTR);
            return;
        }
    };
    module.set(SAVED_NAME_SEQUENCE_ATTR, original);

    let sequence = Mutex::new(DeterministicNameSequence::new());
    module.set(
        NAME_SEQUENCE_ATTR,
        Attribute::function(move |_args| {
            let name = sequence
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .next()
                .unwrap_or_default();
            Ok(Value::String(name))
        }),
    );
}

fn restore_random_names(module: &ModuleHandle) {
    if let Some(original) = module.remove(SAVED_NAME_SEQUENCE_ATTR) {
        module.set(NAME_SEQUENCE_ATTR, original);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::registry::PatchRegistry;

    #[test]
    fn test_default_registration_covers_known_modules() {
        let mut builder = PatchRegistry::builder();
        register_builtin_policies(&mut builder, &SandboxConfig::default());
        let registry = builder.build();

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "numpy.random",
                "numpy.random.mtrand",
                "pydantic_core",
                "random",
                "tempfile",
                "tiktoken"
            ]
        );
        assert!(registry.get(RANDOM).unwrap().before_first_request.is_some());
        assert!(registry.get(TEMPFILE).unwrap().before_first_request.is_some());
        assert!(registry.get("tiktoken").unwrap().before_first_request.is_none());
    }

    #[test]
    fn test_extra_rust_packages_are_registered() {
        let config = SandboxConfig {
            rust_packages: vec!["orjson".to_string()],
            ..SandboxConfig::default()
        };
        let mut builder = PatchRegistry::builder();
        register_builtin_policies(&mut builder, &config);
        let registry = builder.build();

        assert!(registry.contains("orjson"));
        assert!(!registry.contains("tiktoken"));
    }

    #[test]
    fn test_name_sequence_swap_and_restore() {
        let module = crate::module::object::ModuleObject::new(TEMPFILE);
        module.set_function(NAME_SEQUENCE_ATTR, |_| Ok(Value::String("random!".into())));

        install_deterministic_names(&module);
        assert_eq!(
            module.call(NAME_SEQUENCE_ATTR, &[]).unwrap(),
            Value::String("baaaaaaa".into())
        );
        assert!(module.contains(SAVED_NAME_SEQUENCE_ATTR));

        restore_random_names(&module);
        assert_eq!(
            module.call(NAME_SEQUENCE_ATTR, &[]).unwrap(),
            Value::String("random!".into())
        );
        assert!(!module.contains(SAVED_NAME_SEQUENCE_ATTR));
    }
}
