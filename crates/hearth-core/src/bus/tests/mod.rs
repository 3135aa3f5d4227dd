#[cfg(test)]
mod memory_tests;
#[cfg(test)]
mod subject_tests;
