//! Typed serving form for one customer
//!
//! Every field has an enumerated domain or numeric bounds, checked before the
//! profile is turned into a [`RawRecord`] under the analytic table's column
//! names and raw labels.

use crate::data::RawRecord;
use crate::error::ChurnError;
use clap::{Args, ValueEnum};
use std::ops::RangeInclusive;
use tracing::debug;

pub const TENURE_MONTHS: RangeInclusive<f64> = 0.0..=72.0;
pub const MONTHLY_CHARGES: RangeInclusive<f64> = 18.0..=120.0;
pub const TOTAL_CHARGES: RangeInclusive<f64> = 0.0..=10_000.0;
pub const CLTV: RangeInclusive<f64> = 2_000.0..=6_500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn label(&self) -> &'static str {
        match self {
            Gender::Female => "Female",
            Gender::Male => "Male",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum YesNo {
    No,
    Yes,
}

impl YesNo {
    pub fn label(&self) -> &'static str {
        match self {
            YesNo::No => "No",
            YesNo::Yes => "Yes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Contract {
    MonthToMonth,
    OneYear,
    TwoYear,
}

impl Contract {
    pub fn label(&self) -> &'static str {
        match self {
            Contract::MonthToMonth => "Month-to-month",
            Contract::OneYear => "One year",
            Contract::TwoYear => "Two year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PaymentMethod {
    ElectronicCheck,
    MailedCheck,
    BankTransfer,
    CreditCard,
}

impl PaymentMethod {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::ElectronicCheck => "Electronic check",
            PaymentMethod::MailedCheck => "Mailed check",
            PaymentMethod::BankTransfer => "Bank transfer (automatic)",
            PaymentMethod::CreditCard => "Credit card (automatic)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InternetService {
    No,
    Dsl,
    FiberOptic,
}

impl InternetService {
    pub fn label(&self) -> &'static str {
        match self {
            InternetService::No => "No",
            InternetService::Dsl => "DSL",
            InternetService::FiberOptic => "Fiber optic",
        }
    }
}

/// One customer's attributes as collected by the `predict` command
#[derive(Args, Debug, Clone, PartialEq)]
pub struct CustomerProfile {
    #[arg(long, value_enum, default_value_t = Gender::Female)]
    pub gender: Gender,

    #[arg(long, value_enum, default_value_t = YesNo::No)]
    pub senior_citizen: YesNo,

    #[arg(long, value_enum, default_value_t = YesNo::No)]
    pub partner: YesNo,

    #[arg(long, value_enum, default_value_t = YesNo::No)]
    pub dependents: YesNo,

    /// Months with the company, 0 to 72
    #[arg(long, default_value_t = 12.0)]
    pub tenure: f64,

    #[arg(long, value_enum, default_value_t = Contract::MonthToMonth)]
    pub contract: Contract,

    #[arg(long, value_enum, default_value_t = YesNo::No)]
    pub paperless_billing: YesNo,

    #[arg(long, value_enum, default_value_t = PaymentMethod::ElectronicCheck)]
    pub payment_method: PaymentMethod,

    #[arg(long, value_enum, default_value_t = YesNo::No)]
    pub phone_service: YesNo,

    #[arg(long, value_enum, default_value_t = InternetService::No)]
    pub internet_service: InternetService,

    /// Ignored (forced to "no") when there is no internet service
    #[arg(long, value_enum, default_value_t = YesNo::No)]
    pub tech_support: YesNo,

    /// Monthly charges in dollars, 18 to 120
    #[arg(long, default_value_t = 70.0)]
    pub monthly_charges: f64,

    /// Total charges in dollars, 0 to 10000 [default: monthly charges x tenure]
    #[arg(long)]
    pub total_charges: Option<f64>,

    /// Customer lifetime value, 2000 to 6500
    #[arg(long, default_value_t = 4400.0)]
    pub cltv: f64,
}

impl Default for CustomerProfile {
    fn default() -> Self {
        Self {
            gender: Gender::Female,
            senior_citizen: YesNo::No,
            partner: YesNo::No,
            dependents: YesNo::No,
            tenure: 12.0,
            contract: Contract::MonthToMonth,
            paperless_billing: YesNo::No,
            payment_method: PaymentMethod::ElectronicCheck,
            phone_service: YesNo::No,
            internet_service: InternetService::No,
            tech_support: YesNo::No,
            monthly_charges: 70.0,
            total_charges: None,
            cltv: 4400.0,
        }
    }
}

fn check_bounds(name: &str, value: f64, range: &RangeInclusive<f64>) -> crate::Result<()> {
    if !range.contains(&value) {
        anyhow::bail!(ChurnError::InvalidInput(format!(
            "{name} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )));
    }
    Ok(())
}

impl CustomerProfile {
    /// Total charges as entered, else monthly charges times tenure
    pub fn effective_total_charges(&self) -> f64 {
        self.total_charges
            .unwrap_or(self.monthly_charges * self.tenure)
    }

    /// Tech support only applies to internet customers
    pub fn effective_tech_support(&self) -> YesNo {
        match self.internet_service {
            InternetService::No => YesNo::No,
            _ => self.tech_support,
        }
    }

    /// Reject values outside the form's bounds
    pub fn validate(&self) -> crate::Result<()> {
        check_bounds("tenure", self.tenure, &TENURE_MONTHS)?;
        check_bounds("monthly charges", self.monthly_charges, &MONTHLY_CHARGES)?;
        check_bounds("total charges", self.effective_total_charges(), &TOTAL_CHARGES)?;
        check_bounds("CLTV", self.cltv, &CLTV)?;
        Ok(())
    }

    /// Validate and express the profile under the analytic table's column names
    pub fn to_raw_record(&self) -> crate::Result<RawRecord> {
        self.validate()?;
        if self.internet_service == InternetService::No && self.tech_support == YesNo::Yes {
            debug!("No internet service, tech support forced to No");
        }

        Ok(RawRecord::new()
            .with("Gender", self.gender.label())
            .with("Senior Citizen", self.senior_citizen.label())
            .with("Partner", self.partner.label())
            .with("Dependents", self.dependents.label())
            .with("Tenure Months", self.tenure)
            .with("Phone Service", self.phone_service.label())
            .with("Internet Service", self.internet_service.label())
            .with("Tech Support", self.effective_tech_support().label())
            .with("Contract", self.contract.label())
            .with("Paperless Billing", self.paperless_billing.label())
            .with("Payment Method", self.payment_method.label())
            .with("Monthly Charges", self.monthly_charges)
            .with("Total Charges", self.effective_total_charges())
            .with("CLTV", self.cltv))
    }
}
