use crate::config::EngineSettings;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Clock {
    System,
    Fixed(i64),
}

impl Clock {
    /// Unix seconds.
    pub fn now(self) -> i64 {
        match self {
            Self::System => chrono::Utc::now().timestamp(),
            Self::Fixed(t) => t,
        }
    }
}

/// Everything one request needs beyond the database: who is acting, what
/// time it is, where random choices come from, and messages for the UI.
/// Lives exactly as long as the request.
pub struct RequestContext {
    pub user_id: i64,
    pub clock: Clock,
    pub rng: StdRng,
    pub settings: EngineSettings,
    pub messages: Vec<String>,
}

impl RequestContext {
    /// A seeded workspace mixes the request counter into the seed so that
    /// consecutive requests draw different but reproducible values.
    pub fn new(user_id: i64, settings: EngineSettings, request_no: u64) -> Self {
        let rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(request_no)),
            None => StdRng::from_os_rng(),
        };
        let clock = match settings.fixed_now {
            Some(t) => Clock::Fixed(t),
            None => Clock::System,
        };
        Self {
            user_id,
            clock,
            rng,
            settings,
            messages: Vec::new(),
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn message(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }

    #[cfg(test)]
    pub fn for_test(user_id: i64, seed: u64) -> Self {
        let settings = EngineSettings {
            rng_seed: Some(seed),
            fixed_now: Some(1_000),
            ..EngineSettings::default()
        };
        Self::new(user_id, settings, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn seeded_contexts_are_reproducible() {
        let mut a = RequestContext::for_test(1, 5);
        let mut b = RequestContext::for_test(1, 5);
        let xs: Vec<u32> = (0..4).map(|_| a.rng.random_range(0..1000)).collect();
        let ys: Vec<u32> = (0..4).map(|_| b.rng.random_range(0..1000)).collect();
        assert_eq!(xs, ys);
        assert_eq!(a.now(), 1_000);
    }
}
