// src/scheduler.rs

/// Halve-on-plateau learning-rate schedule for a metric that should go up (BLEU).
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    lr: f64,
    factor: f64,
    patience: usize,
    /// Relative improvement a new value needs over the best so far.
    threshold: f64,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(initial_lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            lr: initial_lr,
            factor,
            patience,
            threshold: 1e-4,
            best: f64::NEG_INFINITY,
            bad_epochs: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    fn is_better(&self, metric: f64) -> bool {
        metric > self.best * (1.0 + self.threshold)
    }

    /// Record one epoch's metric. Returns the new learning rate if it was reduced.
    pub fn step(&mut self, metric: f64) -> Option<f64> {
        if self.is_better(metric) {
            self.best = metric;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }

        if self.bad_epochs > self.patience {
            self.bad_epochs = 0;
            let new_lr = self.lr * self.factor;
            if self.lr - new_lr > 1e-12 {
                log::info!("Reducing learning rate {:.6} -> {:.6}", self.lr, new_lr);
                self.lr = new_lr;
                return Some(new_lr);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_after_patience_is_exceeded() {
        let mut sched = PlateauScheduler::new(1e-3, 0.5, 3);
        assert_eq!(sched.step(0.10), None);
        assert_eq!(sched.step(0.10), None);
        assert_eq!(sched.step(0.09), None);
        assert_eq!(sched.step(0.10), None);
        let reduced = sched.step(0.05).unwrap();
        assert!((reduced - 5e-4).abs() < 1e-12);
        assert!((sched.lr() - 5e-4).abs() < 1e-12);
    }

    #[test]
    fn improvement_resets_the_counter() {
        let mut sched = PlateauScheduler::new(1.0, 0.5, 1);
        sched.step(0.1);
        sched.step(0.1);
        sched.step(0.2);
        assert_eq!(sched.step(0.2), None);
        assert_eq!(sched.step(0.2), Some(0.5));
    }

    #[test]
    fn tiny_gains_do_not_count() {
        let mut sched = PlateauScheduler::new(1.0, 0.5, 0);
        sched.step(0.5);
        assert_eq!(sched.step(0.500001), Some(0.5));
    }
}
