pub mod artifact;
pub mod settings;
pub mod study;
pub mod survey;

pub use artifact::{artifact_file_name, ParsedFileName, UploadArtifact};
pub use settings::{DataStream, DevicePermission, DeviceSettings, StreamSettings, StudySettings};
pub use study::Study;
pub use survey::{ActiveSurvey, NotificationHandle, Survey, SurveyType, DAYS_PER_WEEK};
