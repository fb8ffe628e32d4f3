//! Credit ledger: credit accounts, payments, and sale-credit synchronization.

pub mod account;
pub mod payment;
pub mod status;
pub mod sync;

pub use account::{
    AccountClosed, AccountResumed, AccountSuspended, CloseAccount, CreditAccount, CreditAccountId,
    CreditAccountOpened, CreditCommand, CreditEvent, OpenCreditAccount, PaymentRecorded,
    RecordPayment, ResumeAccount, SuspendAccount, UpfrontPayment,
};
pub use payment::{CreditPayment, CustomerId, PaymentId, PaymentMethod, PaymentNumber};
pub use status::{CreditStatus, evaluate};
pub use sync::{on_account_opened, on_payment_recorded};
