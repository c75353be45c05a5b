use rand::Rng;
#[cfg(test)] use std::sync::Mutex;


#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

/// Source of randomness for exploratory link choice and fault injection. Methods are static so
///  that the implementation can be selected with a type parameter and mocked in tests.
#[cfg_attr(test, mockall::automock)]
pub trait Random {
    /// uniformly distributed in `0..upper`; `upper` must be positive
    fn below(upper: usize) -> usize;

    /// `true` with the given probability
    fn chance(probability: f64) -> bool;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn below(upper: usize) -> usize {
        rand::thread_rng().gen_range(0..upper)
    }

    fn chance(probability: f64) -> bool {
        rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0))
    }
}
