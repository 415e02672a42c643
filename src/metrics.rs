/// Running average over a stream of values, e.g. the per batch losses of one epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageMeter {
    total: f64,
    count: usize,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f32) {
        self.total += f64::from(value);
        self.count += 1;
    }

    /// Arithmetic mean of all values seen so far. `None` if there are none.
    pub fn mean(&self) -> Option<f32> {
        (self.count != 0).then(|| (self.total / self.count as f64) as f32)
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::AverageMeter;

    #[test]
    fn mean_of_updates() {
        let mut meter = AverageMeter::new();

        meter.update(1.0);
        meter.update(2.0);
        meter.update(4.5);

        assert_eq!(Some(2.5), meter.mean());
        assert_eq!(3, meter.count());
    }

    #[test]
    fn no_mean_without_values() {
        assert_eq!(None, AverageMeter::new().mean());
    }
}
