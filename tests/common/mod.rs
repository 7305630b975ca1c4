//! Shared test infrastructure for integration tests.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Local model stand-in: answers each prompt shape the pipeline sends.
const MOCK_LM: &str = r#"#!/bin/sh
prompt=$(cat)
case "$prompt" in
  *'"completeness"'*)
    echo '{"completeness": 8, "clarity": 7, "examples": 7}' ;;
  *"positive, neutral, or negative"*)
    echo "positive" ;;
  *"Allowed categories"*)
    echo "Utilities" ;;
  *"factual/counterfactual pairs"*)
    printf '%s\n' \
      "✅ Factual: The crate parses configuration files." \
      "❌ Counterfactual: The crate renders HTML pages." \
      "" \
      "✅ Factual: The crate has no unsafe code." \
      "❌ Counterfactual: The crate wraps a C library." \
      "" \
      "✅ Factual: The crate builds on stable Rust." \
      "❌ Counterfactual: The crate requires nightly Rust." ;;
  *"from its README"*)
    echo "Parses configuration files, validates them against a schema, and reports readable errors." ;;
  *)
    echo "The std feature enables standard library support." ;;
esac
"#;

/// Temp workspace with fixtures, an output directory, and the mock model.
pub struct TestWorkspace {
    _temp: TempDir,
    pub fixtures: PathBuf,
    pub output: PathBuf,
    lm_command: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let fixtures = temp.path().join("fixtures");
        let output = temp.path().join("output");
        fs::create_dir_all(&fixtures)?;
        let lm_command = temp.path().join("mock-lm.sh");
        fs::write(&lm_command, MOCK_LM)?;
        make_executable(&lm_command)?;
        Ok(Self {
            _temp: temp,
            fixtures,
            output,
            lm_command,
        })
    }

    /// Write `<name>.json` into the fixtures directory.
    pub fn write_fixture(&self, fixture: &Value) -> Result<()> {
        let name = fixture["name"]
            .as_str()
            .ok_or_else(|| anyhow!("fixture without name"))?;
        fs::write(
            self.fixtures.join(format!("{name}.json")),
            serde_json::to_vec_pretty(fixture)?,
        )?;
        Ok(())
    }

    /// Run `ctrust` with the workspace output directory.
    pub fn ctrust(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new(env!("CARGO_BIN_EXE_ctrust"))
            .args(args)
            .arg("--output")
            .arg(&self.output)
            .env("RUST_LOG", "warn")
            .env_remove("CTRUST_LM_COMMAND")
            .output()
            .context("spawn ctrust")?;
        Ok(output)
    }

    /// `ctrust run --json` over fixtures with the mock model.
    pub fn run(&self, names: &[&str]) -> Result<Value> {
        let mut args = vec!["run", "--json", "--batch-size", "2"];
        args.extend_from_slice(names);
        let fixtures = self.fixtures.display().to_string();
        let lm = self.lm_command.display().to_string();
        args.extend_from_slice(&["--fixtures", &fixtures, "--lm", &lm]);
        let output = self.ctrust(&args)?;
        if !output.status.success() {
            return Err(anyhow!(
                "ctrust run failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Lines in the inference log so far.
    pub fn inference_calls(&self) -> usize {
        fs::read_to_string(self.output.join("inference_log.jsonl"))
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
