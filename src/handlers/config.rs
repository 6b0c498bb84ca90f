use crate::cli::ConfigAction;
use anyhow::Result;
use chunkfetch::ConfigManager;
use console::{Term, style};
use dialoguer::Confirm;
use std::process;

pub async fn handle_config(config_manager: &mut ConfigManager, action: ConfigAction) -> Result<()> {
    let term = Term::stdout();

    match action {
        ConfigAction::Show => {
            let config_content = std::fs::read_to_string(config_manager.config_file())?;

            term.write_line(&format!("{} Current configuration:", style("⚙️").cyan()))?;
            term.write_line("")?;
            term.write_line(&config_content)?;
        }

        ConfigAction::Path => {
            term.write_line(&config_manager.config_file().display().to_string())?;
        }

        ConfigAction::Validate => {
            term.write_line(&format!(
                "{} Validating configuration...",
                style("🔍").cyan()
            ))?;

            match config_manager.validate() {
                Ok(()) => {
                    term.write_line(&format!("{} Configuration is valid", style("✅").green()))?;
                }
                Err(e) => {
                    term.write_line(&format!(
                        "{} Configuration validation failed:",
                        style("❌").red()
                    ))?;
                    term.write_line(&format!("   {}", e))?;
                    term.write_line(&format!(
                        "{} Run 'chunkfetch config reset' to restore the defaults",
                        style("💡").yellow()
                    ))?;
                    process::exit(1);
                }
            }
        }

        ConfigAction::Reset { yes } => {
            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt("Reset configuration to defaults?")
                    .default(false)
                    .interact()?;
                if !confirmed {
                    term.write_line("Cancelled")?;
                    return Ok(());
                }
            }

            config_manager.reset()?;
            term.write_line(&format!(
                "{} Configuration reset to defaults at {}",
                style("✅").green(),
                style(config_manager.config_file().display()).cyan()
            ))?;
        }
    }

    Ok(())
}
