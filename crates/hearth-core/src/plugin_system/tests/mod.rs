#[cfg(test)]
mod dependency_tests;
#[cfg(test)]
mod registry_tests;
#[cfg(test)]
mod resolver_tests;
