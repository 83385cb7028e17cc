use bossify_core::{entropy, template};
use bossify_engine::{BossConfig, BossError};

/// Local-only template audit: no repository access, no remote session.
pub fn execute(template_text: &str) -> anyhow::Result<()> {
    let config = BossConfig::from_env()?;
    let nodes = template::parse(template_text).map_err(BossError::Template)?;
    let count = template::count_variants(&nodes);
    let assessment = entropy::validate(
        count,
        entropy::prefix_bits(&config.target_prefix),
        config.inverse_failure_rate,
    );

    println!(
        "Template: {} variants ({:.1} bits)",
        count,
        template::entropy_bits(count)
    );
    println!(
        "Target: {} ({} bits)",
        config.target_prefix, assessment.target_bits
    );
    println!("Required: {} variants", assessment.required_variants);

    if assessment.is_valid {
        println!(
            "OK: exhaustion probability {:.3e} (tolerance {:.1e})",
            assessment.failure_probability, assessment.target_failure_probability
        );
        Ok(())
    } else {
        Err(BossError::InsufficientEntropy { assessment }.into())
    }
}
