//! Boot-time configuration of the thread core.
use crate::{
    KernelError,
    thread::{PRI_DEFAULT, PRI_MAX, PRI_MIN, Priority},
};

/// Number of timer ticks a thread may run before it yields to a thread of
/// equal priority.
pub const TIME_SLICE: u64 = 4;

/// System-wide settings, fixed when the kernel is booted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemConfiguration {
    time_slice: u64,
    main_priority: Priority,
}

impl SystemConfiguration {
    /// Starts building a configuration from the defaults.
    pub fn builder() -> SystemConfigurationBuilder {
        SystemConfigurationBuilder {
            config: Self::default(),
        }
    }

    /// Length of a time slice in ticks.
    pub fn time_slice(&self) -> u64 {
        self.time_slice
    }

    /// Priority of the thread that boots the kernel.
    pub fn main_priority(&self) -> Priority {
        self.main_priority
    }
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            time_slice: TIME_SLICE,
            main_priority: PRI_DEFAULT,
        }
    }
}

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring system-wide settings before the kernel is booted with
/// [`Kernel::new`].
///
/// [`Kernel::new`]: crate::Kernel::new
pub struct SystemConfigurationBuilder {
    config: SystemConfiguration,
}

impl SystemConfigurationBuilder {
    /// Sets the length of a time slice in ticks.
    pub fn time_slice(mut self, ticks: u64) -> Self {
        self.config.time_slice = ticks;
        self
    }

    /// Sets the priority of the boot thread.
    pub fn main_priority(mut self, priority: Priority) -> Self {
        self.config.main_priority = priority;
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] if the time slice is zero or the main
    /// priority is out of range.
    pub fn build(self) -> Result<SystemConfiguration, KernelError> {
        if self.config.time_slice == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if !(PRI_MIN..=PRI_MAX).contains(&self.config.main_priority) {
            return Err(KernelError::InvalidArgument);
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_validates() {
        let config = SystemConfiguration::builder()
            .time_slice(2)
            .main_priority(PRI_MIN)
            .build()
            .unwrap();
        assert_eq!(config.time_slice(), 2);
        assert_eq!(config.main_priority(), PRI_MIN);

        assert_eq!(
            SystemConfiguration::builder().time_slice(0).build(),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            SystemConfiguration::builder()
                .main_priority(PRI_MAX + 1)
                .build(),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            SystemConfiguration::builder().build(),
            Ok(SystemConfiguration::default())
        );
    }
}
