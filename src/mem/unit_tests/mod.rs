#[cfg(test)]
mod harness;

#[cfg(test)]
mod bank_tests;
#[cfg(test)]
mod claim_tests;
#[cfg(test)]
mod tile_tests;
