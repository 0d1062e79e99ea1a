//! Target command implementation.

use anyhow::{Context, Result};
use blecmd_core::{PeripheralAddress, TargetStore};

use crate::cli::{OutputFormat, TargetAction};
use crate::format::{FormatOptions, format_targets_text};

/// Apply `action` to the stored targets and return what to print.
pub fn cmd_target(
    action: TargetAction,
    store: &dyn TargetStore,
    opts: &FormatOptions,
) -> Result<String> {
    let mut targets = store.load().context("Failed to load shutdown targets")?;

    let message = match action {
        TargetAction::Show { format } => {
            return match format {
                OutputFormat::Text => Ok(format_targets_text(&targets, opts)),
                OutputFormat::Json => opts.as_json(&targets),
            };
        }
        TargetAction::SetMachine { address } => {
            let address = PeripheralAddress::new(address).context("Invalid machine address")?;
            let message = format!("Machine set to {}\n", address);
            targets.set_machine(address);
            message
        }
        TargetAction::SetScale {
            address,
            scale_type,
        } => {
            let address = PeripheralAddress::new(address).context("Invalid scale address")?;
            let message = format!("Scale set to {} ({})\n", address, scale_type);
            targets.set_scale(address, scale_type);
            message
        }
        TargetAction::ClearMachine => {
            targets.clear_machine();
            "Machine cleared\n".to_string()
        }
        TargetAction::ClearScale => {
            targets.clear_scale();
            "Scale cleared\n".to_string()
        }
    };

    store
        .save(&targets)
        .context("Failed to save shutdown targets")?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blecmd_core::{FileTargetStore, MemoryTargetStore, ShutdownTargets};

    fn opts() -> FormatOptions {
        FormatOptions::new(true)
    }

    #[test]
    fn test_set_and_show() {
        let store = MemoryTargetStore::default();
        let out = cmd_target(
            TargetAction::SetMachine {
                address: "AA:BB:CC:DD:EE:FF".to_string(),
            },
            &store,
            &opts(),
        )
        .unwrap();
        assert_eq!(out, "Machine set to AA:BB:CC:DD:EE:FF\n");

        let shown = cmd_target(
            TargetAction::Show {
                format: OutputFormat::Text,
            },
            &store,
            &opts(),
        )
        .unwrap();
        assert!(shown.contains("Machine: AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_clear_scale() {
        let mut initial = ShutdownTargets::new();
        initial.set_scale(PeripheralAddress::new("scale").unwrap(), "acaia");
        let store = MemoryTargetStore::new(initial);

        cmd_target(TargetAction::ClearScale, &store, &opts()).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_blank_address() {
        let store = MemoryTargetStore::default();
        let result = cmd_target(
            TargetAction::SetMachine {
                address: "  ".to_string(),
            },
            &store,
            &opts(),
        );
        assert!(result.is_err());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_show_json_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTargetStore::new(dir.path().join("targets.toml"));
        cmd_target(
            TargetAction::SetScale {
                address: "scale-1".to_string(),
                scale_type: "decent".to_string(),
            },
            &store,
            &opts(),
        )
        .unwrap();

        let json = cmd_target(
            TargetAction::Show {
                format: OutputFormat::Json,
            },
            &store,
            &opts(),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["scale"]["address"], "scale-1");
        assert_eq!(value["scale"]["scale_type"], "decent");
        assert!(value.get("machine").is_none());
    }
}
