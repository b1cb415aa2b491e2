pub(crate) mod backup;
pub(crate) mod check;
pub(crate) mod run;
