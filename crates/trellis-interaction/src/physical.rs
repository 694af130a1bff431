//! Physical device properties.
//!
//! Subscription interval defaults depend on what the peer physically is:
//! a battery device should not be woken every second for keep-alives,
//! a mains-powered wifi device can report quickly.

use std::time::Duration;

/// How the peer reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkTechnology {
    #[default]
    Wifi,
    Ethernet,
    ThreadRoutable,
    ThreadSleepy,
}

/// Physical characteristics relevant to subscription scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalDeviceProperties {
    pub technology: NetworkTechnology,
    pub battery_powered: bool,
    /// Device sleeps between check-ins and cannot honor a floor.
    pub intermittently_connected: bool,
}

/// The derived default subscription intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionIntervalBounds {
    pub min_floor: Duration,
    pub max_ceiling: Duration,
}

impl PhysicalDeviceProperties {
    /// Default interval bounds for subscribing to this device.
    pub fn subscription_interval_bounds(&self) -> SubscriptionIntervalBounds {
        let max_ceiling = if self.battery_powered {
            Duration::from_secs(600)
        } else {
            match self.technology {
                NetworkTechnology::ThreadSleepy => Duration::from_secs(180),
                NetworkTechnology::ThreadRoutable
                | NetworkTechnology::Wifi
                | NetworkTechnology::Ethernet => Duration::from_secs(60),
            }
        };
        let min_floor = if self.intermittently_connected {
            Duration::ZERO
        } else {
            Duration::from_secs(1)
        };
        SubscriptionIntervalBounds {
            min_floor,
            max_ceiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(NetworkTechnology::Wifi, false, 60)]
    #[test_case(NetworkTechnology::Ethernet, false, 60)]
    #[test_case(NetworkTechnology::ThreadRoutable, false, 60)]
    #[test_case(NetworkTechnology::ThreadSleepy, false, 180)]
    #[test_case(NetworkTechnology::Wifi, true, 600)]
    #[test_case(NetworkTechnology::ThreadSleepy, true, 600)]
    fn ceiling_defaults(technology: NetworkTechnology, battery: bool, expected_s: u64) {
        let props = PhysicalDeviceProperties {
            technology,
            battery_powered: battery,
            intermittently_connected: false,
        };
        assert_eq!(
            props.subscription_interval_bounds().max_ceiling,
            Duration::from_secs(expected_s)
        );
    }

    #[test]
    fn intermittently_connected_forces_zero_floor() {
        let props = PhysicalDeviceProperties {
            intermittently_connected: true,
            ..PhysicalDeviceProperties::default()
        };
        assert_eq!(
            props.subscription_interval_bounds().min_floor,
            Duration::ZERO
        );
    }
}
