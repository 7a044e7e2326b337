use super::ids::ProgramId;
use super::money::{Amount, Currency};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Catalog entry for a programme of study. Only the fee inputs matter to the engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    /// When set, the session-wide default form fee applies regardless of `form_fee`.
    pub use_default_form_fee: bool,
    pub form_fee: Option<Amount>,
    pub acceptance_fee: Option<Amount>,
    pub admission_fee: Option<Amount>,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProgramId::new(),
            name: name.into(),
            use_default_form_fee: true,
            form_fee: None,
            acceptance_fee: None,
            admission_fee: None,
        }
    }
}

/// Session-wide fee defaults.
///
/// Every fee the engines charge is derived from a `Program` and this schedule through
/// the pure functions below, so the same snapshot always yields the same amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub currency: Currency,
    pub default_form_fee: Amount,
    pub default_acceptance_fee: Amount,
    pub default_admission_fee: Amount,
}

impl FeeSchedule {
    pub fn form_fee(&self, program: &Program) -> Amount {
        match (program.use_default_form_fee, program.form_fee) {
            (false, Some(fee)) => fee,
            _ => self.default_form_fee,
        }
    }

    pub fn acceptance_fee(&self, program: &Program) -> Amount {
        program.acceptance_fee.unwrap_or(self.default_acceptance_fee)
    }

    pub fn admission_fee(&self, program: &Program) -> Amount {
        program.admission_fee.unwrap_or(self.default_admission_fee)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            currency: Currency("NGN".to_string()),
            default_form_fee: Amount(dec!(10000)),
            default_acceptance_fee: Amount(dec!(50000)),
            default_admission_fee: Amount(dec!(25000)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[test]
    fn test_form_fee_prefers_program_fee_when_not_defaulted() {
        let schedule = FeeSchedule::default();
        let mut program = Program::new("Computer Science");
        program.use_default_form_fee = false;
        program.form_fee = Some(amount(dec!(15000)));

        assert_eq!(schedule.form_fee(&program), amount(dec!(15000)));

        program.use_default_form_fee = true;
        assert_eq!(schedule.form_fee(&program), schedule.default_form_fee);
    }

    #[test]
    fn test_form_fee_falls_back_when_program_fee_missing() {
        let schedule = FeeSchedule::default();
        let mut program = Program::new("Law");
        program.use_default_form_fee = false;

        assert_eq!(schedule.form_fee(&program), schedule.default_form_fee);
    }

    #[test]
    fn test_acceptance_and_admission_fee_defaults() {
        let schedule = FeeSchedule::default();
        let mut program = Program::new("Medicine");
        assert_eq!(
            schedule.acceptance_fee(&program),
            schedule.default_acceptance_fee
        );
        assert_eq!(
            schedule.admission_fee(&program),
            schedule.default_admission_fee
        );

        program.acceptance_fee = Some(amount(dec!(75000)));
        program.admission_fee = Some(amount(dec!(30000)));
        assert_eq!(schedule.acceptance_fee(&program), amount(dec!(75000)));
        assert_eq!(schedule.admission_fee(&program), amount(dec!(30000)));
    }
}
