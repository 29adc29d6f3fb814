use cheetah_core::errors::{CampError, ErrorInfo};

use crate::profile::MachineProfile;

const PROFILES: &[(&str, &str)] = &[
    ("local", include_str!("../profiles/local.yaml")),
    ("titan", include_str!("../profiles/titan.yaml")),
    ("theta", include_str!("../profiles/theta.yaml")),
    ("cori", include_str!("../profiles/cori.yaml")),
];

/// Names of the profiles shipped with the crate.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    PROFILES.iter().map(|(name, _)| *name)
}

/// Loads a shipped profile by name.
pub fn builtin_profile(name: &str) -> Result<MachineProfile, CampError> {
    let Some((_, yaml)) = PROFILES.iter().find(|(known, _)| *known == name) else {
        return Err(CampError::Configuration(
            ErrorInfo::new("machine.unknown", "no built-in profile with this name")
                .with_context("machine", name)
                .with_hint(format!(
                    "known machines: {}",
                    builtin_names().collect::<Vec<_>>().join(", ")
                )),
        ));
    };
    MachineProfile::from_yaml_slice(yaml.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerKind;

    #[test]
    fn every_shipped_profile_parses() {
        for name in builtin_names() {
            let profile = builtin_profile(name).expect(name);
            assert_eq!(profile.name, name);
        }
    }

    #[test]
    fn shipped_schedulers() {
        let kinds: Vec<SchedulerKind> = builtin_names()
            .map(|name| builtin_profile(name).expect(name).scheduler)
            .collect();
        assert_eq!(
            kinds,
            vec![
                SchedulerKind::None,
                SchedulerKind::Pbs,
                SchedulerKind::Cobalt,
                SchedulerKind::Slurm
            ]
        );
    }

    #[test]
    fn unknown_machine_is_configuration_error() {
        let err = builtin_profile("summit").expect_err("unknown");
        assert_eq!(err.info().code, "machine.unknown");
        assert!(err.is_fatal());
    }
}
