use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::core::{
    error::{ComponentError, ComponentResult},
    traits::Source,
};

/// Uniform random `f64` in `[0, 1)`.
///
/// Seeded at init, from the configured seed or from entropy.
#[derive(Debug, Default)]
pub struct RandomSource {
    seed: Option<u64>,
    rng: Option<StdRng>,
    debug: bool,
}

impl RandomSource {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            rng: None,
            debug: false,
        }
    }
}

#[async_trait::async_trait]
impl Source<f64> for RandomSource {
    async fn init(&mut self, debug: bool) -> ComponentResult<()> {
        self.debug = debug;
        self.rng = Some(match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        });
        Ok(())
    }

    async fn produce(&mut self) -> ComponentResult<f64> {
        let rng = self
            .rng
            .as_mut()
            .ok_or(ComponentError::NotInitialized("random source"))?;
        let value: f64 = rng.gen();
        if self.debug {
            debug!(value, "Generated random value");
        }
        Ok(value)
    }

    async fn close(&mut self) -> ComponentResult<()> {
        self.rng = None;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[tokio::test]
    async fn test_produce_before_init_fails() {
        let mut source = RandomSource::new(None);
        assert!(matches!(
            source.produce().await,
            Err(ComponentError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_values_in_unit_interval() {
        let mut source = RandomSource::new(None);
        source.init(false).await.unwrap();
        for _ in 0..1000 {
            let value = source.produce().await.unwrap();
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[tokio::test]
    async fn test_seed_is_reproducible() {
        let mut a = RandomSource::new(Some(42));
        let mut b = RandomSource::new(Some(42));
        a.init(false).await.unwrap();
        b.init(false).await.unwrap();
        for _ in 0..10 {
            assert_eq!(a.produce().await.unwrap(), b.produce().await.unwrap());
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_debug_logs_value() {
        let mut source = RandomSource::new(Some(1));
        source.init(true).await.unwrap();
        source.produce().await.unwrap();
        assert!(logs_contain("Generated random value"));
    }

    #[tokio::test]
    async fn test_close_resets_generator() {
        let mut source = RandomSource::new(Some(1));
        source.init(false).await.unwrap();
        source.close().await.unwrap();
        assert!(source.produce().await.is_err());
    }
}
