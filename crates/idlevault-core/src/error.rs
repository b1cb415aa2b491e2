pub use idlevault_types::error::{IdlevaultError, Result};
