pub(crate) mod fakes;

#[cfg(test)]
mod backoff_tests;
#[cfg(test)]
mod monitor_tests;
#[cfg(test)]
mod process_tests;
