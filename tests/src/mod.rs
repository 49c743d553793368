
#[cfg(test)]
pub mod delivery_tests;
#[cfg(test)]
pub mod integrity_tests;
#[cfg(test)]
pub mod presign_tests;
