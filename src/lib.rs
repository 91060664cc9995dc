//! Usage metering and premium entitlement core for AutoMate.
//!
//! Every paid AI feature (damage analysis, fault-code explanation, OCR,
//! chat) calls [`CreditLedger::consume_one`] before forwarding anything to
//! an AI provider, and proceeds only on success. Premium status is granted
//! by redeeming a single-use passcode through [`PasscodeRegistry::redeem`].
//!
//! All state lives in a SQLite database; every check-then-mutate step runs
//! as a single conditional update or transaction so concurrent requests for
//! the same user can never double-spend a credit.

pub mod credits;
pub mod roles;

pub use credits::{
    CreditError, CreditInfo, CreditLedger, CreditState, Passcode, PasscodeRegistry, Redemption,
    UserCredits,
};
pub use roles::{AdminList, RoleCheck};
