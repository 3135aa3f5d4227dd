#[cfg(test)]
mod audit_tests;
#[cfg(test)]
mod enforcer_tests;
