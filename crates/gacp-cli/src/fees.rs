//! # Fees Subcommand
//!
//! Quotes every payment milestone for a prospective application. The
//! herbs are given as `NAME:MULTIPLIER`, optionally suffixed with
//! `:special` for controlled herbs; the highest multiplier applies.

use std::str::FromStr;

use anyhow::{bail, Context};
use clap::Args;

use gacp_core::{ActorId, FeeMultiplier, Timestamp};
use gacp_workflow::{Application, Herb, PaymentGate, PaymentReason, WorkflowConfig};

/// Arguments for the `gacp fees` subcommand.
#[derive(Args, Debug)]
pub struct FeesArgs {
    /// Herb on the application, as NAME:MULTIPLIER[:special]. Repeatable.
    #[arg(long = "herb", value_name = "NAME:MULT[:special]")]
    pub herbs: Vec<String>,

    /// Only quote this milestone (initial, 3rd_review, audit, audit_fail, field_audit).
    #[arg(long)]
    pub milestone: Option<String>,
}

/// Parse one `--herb` value.
pub fn parse_herb(value: &str) -> anyhow::Result<Herb> {
    let mut parts = value.split(':');
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        bail!("herb {value:?} has no name");
    }
    let multiplier = match parts.next() {
        Some(m) => FeeMultiplier::parse_decimal(m.trim())
            .with_context(|| format!("herb {name:?} has an invalid multiplier"))?,
        None => FeeMultiplier::ONE,
    };
    let special_license_required = match parts.next() {
        None => false,
        Some("special") => true,
        Some(other) => bail!("herb {name:?}: unknown flag {other:?}, expected \"special\""),
    };
    if parts.next().is_some() {
        bail!("herb {value:?} has too many fields");
    }
    Ok(Herb {
        name: name.to_string(),
        multiplier,
        special_license_required,
    })
}

/// Print the fee for each requested milestone.
pub fn run_fees(args: &FeesArgs, config: &WorkflowConfig) -> anyhow::Result<u8> {
    let herbs = args
        .herbs
        .iter()
        .map(|h| parse_herb(h))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let milestones = match &args.milestone {
        Some(m) => vec![PaymentReason::from_str(m)?],
        None => PaymentReason::ALL.to_vec(),
    };

    let quote = quote(config, herbs, &milestones)?;
    println!("multiplier: {}", quote.multiplier);
    if quote.special_license {
        println!("special license: required");
    }
    for (milestone, amount) in &quote.fees {
        println!("{:<14} {amount:>10}", milestone.as_str());
    }
    Ok(0)
}

/// Fees for a hypothetical application carrying `herbs`.
#[derive(Debug)]
pub struct Quote {
    pub multiplier: FeeMultiplier,
    pub special_license: bool,
    pub fees: Vec<(PaymentReason, gacp_core::Amount)>,
}

pub fn quote(
    config: &WorkflowConfig,
    herbs: Vec<Herb>,
    milestones: &[PaymentReason],
) -> anyhow::Result<Quote> {
    let gate = PaymentGate::new(config.fees.clone());
    let mut application = Application::new(ActorId::new("quote")?, "quote", Timestamp::now());
    for herb in herbs {
        application = application.with_herb(herb);
    }
    let fees = milestones
        .iter()
        .map(|&m| Ok((m, gate.fee_for(m, &application)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Quote {
        multiplier: gate.effective_multiplier(&application),
        special_license: gate.requires_special_license(&application),
        fees,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gacp_core::Amount;

    #[test]
    fn parse_herb_forms() {
        let plain = parse_herb("ginger").unwrap();
        assert_eq!(plain.multiplier, FeeMultiplier::ONE);
        assert!(!plain.special_license_required);

        let weighted = parse_herb("cannabis:1.5:special").unwrap();
        assert_eq!(weighted.name, "cannabis");
        assert_eq!(weighted.multiplier.basis_points(), 15_000);
        assert!(weighted.special_license_required);
    }

    #[test]
    fn parse_herb_rejects_bad_input() {
        assert!(parse_herb("").is_err());
        assert!(parse_herb(":1.5").is_err());
        assert!(parse_herb("kratom:3.0").is_err());
        assert!(parse_herb("kratom:1.5:secret").is_err());
        assert!(parse_herb("kratom:1.5:special:x").is_err());
    }

    #[test]
    fn quote_uses_highest_multiplier() {
        let herbs = vec![parse_herb("turmeric:1.0").unwrap(), parse_herb("cannabis:1.5").unwrap()];
        let quote = quote(
            &WorkflowConfig::default(),
            herbs,
            &[PaymentReason::Initial, PaymentReason::Audit],
        )
        .unwrap();
        assert_eq!(quote.multiplier.basis_points(), 15_000);
        assert_eq!(
            quote.fees,
            vec![
                (PaymentReason::Initial, Amount(7_500)),
                (PaymentReason::Audit, Amount(37_500)),
            ]
        );
        assert!(!quote.special_license);
    }

    #[test]
    fn no_herbs_quotes_base_fees() {
        let quote = quote(&WorkflowConfig::default(), vec![], &[PaymentReason::Initial]).unwrap();
        assert_eq!(quote.fees, vec![(PaymentReason::Initial, Amount(5_000))]);
    }

    #[test]
    fn unknown_milestone_is_an_error() {
        let args = FeesArgs {
            herbs: vec![],
            milestone: Some("tip".to_string()),
        };
        assert!(run_fees(&args, &WorkflowConfig::default()).is_err());
    }
}
