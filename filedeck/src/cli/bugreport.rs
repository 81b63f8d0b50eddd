use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(&[
            "SHELL",
            "TERM",
            "RUST_LOG",
            "FILEDECK_PORT",
            "FILEDECK_BACKEND",
            "FILEDECK_BUCKET",
            "FILEDECK_DATA_DIR",
            "FILEDECK_GCS_ENDPOINT",
        ]))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}
