//! Hydration phases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::HydrationError;

/// Phases of hydration, in the order they are entered.
///
/// Ordering follows declaration order, so `phase >= HydrationPhase::EffectsRunning`
/// reads as "effects have started".
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HydrationPhase {
	/// Nothing has run yet.
	#[default]
	NotStarted,
	/// Component scripts are running with notifications suspended.
	ScriptsExecuting,
	/// Loop directives are expanded.
	LoopsProcessing,
	/// Registered effects run for the first time.
	EffectsRunning,
	/// Portals are rendered and hydrated.
	PortalsRendering,
	/// Hydration finished.
	Complete,
}

impl HydrationPhase {
	/// Every phase in order.
	pub const ALL: [HydrationPhase; 6] = [
		HydrationPhase::NotStarted,
		HydrationPhase::ScriptsExecuting,
		HydrationPhase::LoopsProcessing,
		HydrationPhase::EffectsRunning,
		HydrationPhase::PortalsRendering,
		HydrationPhase::Complete,
	];

	/// The phase after this one, `None` for [`Complete`](Self::Complete).
	pub fn next(self) -> Option<HydrationPhase> {
		match self {
			HydrationPhase::NotStarted => Some(HydrationPhase::ScriptsExecuting),
			HydrationPhase::ScriptsExecuting => Some(HydrationPhase::LoopsProcessing),
			HydrationPhase::LoopsProcessing => Some(HydrationPhase::EffectsRunning),
			HydrationPhase::EffectsRunning => Some(HydrationPhase::PortalsRendering),
			HydrationPhase::PortalsRendering => Some(HydrationPhase::Complete),
			HydrationPhase::Complete => None,
		}
	}

	/// Wire name of the phase.
	pub fn as_str(self) -> &'static str {
		match self {
			HydrationPhase::NotStarted => "not_started",
			HydrationPhase::ScriptsExecuting => "scripts_executing",
			HydrationPhase::LoopsProcessing => "loops_processing",
			HydrationPhase::EffectsRunning => "effects_running",
			HydrationPhase::PortalsRendering => "portals_rendering",
			HydrationPhase::Complete => "complete",
		}
	}

	/// Whether hydration has started but not finished.
	pub fn is_hydrating(self) -> bool {
		!matches!(self, HydrationPhase::NotStarted | HydrationPhase::Complete)
	}
}

impl fmt::Display for HydrationPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for HydrationPhase {
	type Err = HydrationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		HydrationPhase::ALL
			.into_iter()
			.find(|phase| phase.as_str() == s)
			.ok_or_else(|| HydrationError::UnknownPhase(s.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_next_walks_every_phase_once() {
		let mut phase = HydrationPhase::NotStarted;
		let mut visited = vec![phase];
		while let Some(next) = phase.next() {
			assert!(next > phase);
			visited.push(next);
			phase = next;
		}
		assert_eq!(visited, HydrationPhase::ALL);
	}

	#[rstest]
	#[case("not_started", HydrationPhase::NotStarted)]
	#[case("effects_running", HydrationPhase::EffectsRunning)]
	#[case("complete", HydrationPhase::Complete)]
	fn test_parse_wire_names(#[case] name: &str, #[case] expected: HydrationPhase) {
		assert_eq!(name.parse::<HydrationPhase>().unwrap(), expected);
		assert_eq!(expected.to_string(), name);
	}

	#[rstest]
	fn test_unknown_name_is_rejected() {
		assert!(matches!(
			"rendering".parse::<HydrationPhase>(),
			Err(HydrationError::UnknownPhase(_))
		));
	}

	#[rstest]
	fn test_serde_uses_wire_names() {
		let json = serde_json::to_string(&HydrationPhase::PortalsRendering).unwrap();
		assert_eq!(json, r#""portals_rendering""#);
	}

	#[rstest]
	#[case(HydrationPhase::NotStarted, false)]
	#[case(HydrationPhase::LoopsProcessing, true)]
	#[case(HydrationPhase::Complete, false)]
	fn test_is_hydrating(#[case] phase: HydrationPhase, #[case] expected: bool) {
		assert_eq!(phase.is_hydrating(), expected);
	}
}
