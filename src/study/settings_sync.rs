//! Applies server permission states to the study's stream flags.

use log::info;

use crate::models::{DataStream, DeviceSettings, Study};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamChange {
    pub stream: DataStream,
    pub from: bool,
    pub to: bool,
}

/// Store `device` on the study and flip every reported stream whose derived
/// collection flag differs from the study settings. Streams the server did
/// not mention keep their current flag.
pub fn reconcile_settings(study: &mut Study, device: DeviceSettings) -> Vec<StreamChange> {
    let mut changes = Vec::new();

    if let Some(settings) = study.study_settings.as_mut() {
        for (stream, permission) in &device.permissions {
            let from = settings.stream(*stream).enabled;
            let to = permission.allows_collection();
            if from != to {
                info!(
                    "{} changed from {from} to {to} ({permission:?})",
                    stream.as_str()
                );
                settings.set_enabled(*stream, to);
                changes.push(StreamChange {
                    stream: *stream,
                    from,
                    to,
                });
            }
        }
    }

    study.settings_check_frequency = device.check_for_new_settings_freq_seconds.max(1);
    study.device_settings = Some(device);
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DevicePermission, StudySettings};

    fn study_with(enabled: &[DataStream]) -> Study {
        let mut settings = StudySettings::default();
        for stream in enabled {
            settings.set_enabled(*stream, true);
        }
        Study::new("p1", settings)
    }

    fn device(entries: &[(DataStream, DevicePermission)]) -> DeviceSettings {
        DeviceSettings {
            check_for_new_settings_freq_seconds: 120,
            permissions: entries.iter().copied().collect(),
        }
    }

    #[test]
    fn requested_and_enabled_turn_streams_on() {
        let mut study = study_with(&[]);
        let changes = reconcile_settings(
            &mut study,
            device(&[
                (DataStream::Gps, DevicePermission::Requested),
                (DataStream::Gyro, DevicePermission::Enabled),
            ]),
        );

        assert_eq!(changes.len(), 2);
        let settings = study.study_settings.as_ref().unwrap();
        assert!(settings.stream(DataStream::Gps).enabled);
        assert!(settings.stream(DataStream::Gyro).enabled);
    }

    #[test]
    fn denied_and_disabled_turn_streams_off() {
        let mut study = study_with(&[DataStream::Accelerometer, DataStream::Proximity]);
        let changes = reconcile_settings(
            &mut study,
            device(&[
                (DataStream::Accelerometer, DevicePermission::Denied),
                (DataStream::Proximity, DevicePermission::Disabled),
            ]),
        );

        assert_eq!(
            changes,
            vec![
                StreamChange {
                    stream: DataStream::Accelerometer,
                    from: true,
                    to: false
                },
                StreamChange {
                    stream: DataStream::Proximity,
                    from: true,
                    to: false
                },
            ]
        );
    }

    #[test]
    fn unchanged_and_unreported_streams_produce_no_changes() {
        let mut study = study_with(&[DataStream::Gps, DataStream::Motion]);
        let changes = reconcile_settings(
            &mut study,
            device(&[(DataStream::Gps, DevicePermission::Enabled)]),
        );

        assert!(changes.is_empty());
        assert!(study.study_settings.as_ref().unwrap().stream(DataStream::Motion).enabled);
        assert_eq!(study.settings_check_frequency, 120);
        assert!(study.device_settings.is_some());
    }
}
