//! End-to-end tests from a sandbox configuration to a domain specification.

use corral::test_utils::MockConnection;
use corral::{
    BackendKind, BuildError, CommandSpec, DomainBoot, Error, HypervisorConnection, MountMode,
    MountSpec, SandboxConfig, ServiceConfig, ServiceDescriptor, build_domain, config,
};

fn logger_config() -> SandboxConfig {
    SandboxConfig::new("web", ["/usr/bin/httpd", "-f"])
        .kernel_boot("/boot/vmlinuz", "/boot/initrd.img")
        .service(ServiceConfig::new("logger", CommandSpec::new(["/bin/log"])))
}

#[test]
fn machine_with_logger_service() {
    let conn = MockConnection::qemu();
    let spec = build_domain(&logger_config(), &conn).unwrap();

    assert_eq!(spec.console_names(), vec!["console0", "console-logger"]);

    let descriptor = ServiceDescriptor::parse(&spec.config_channel.contents).unwrap();
    assert_eq!(descriptor.len(), 2);
    assert_eq!(descriptor.primary().name, "main");
    assert_eq!(descriptor.primary().argv, vec!["/usr/bin/httpd", "-f"]);
    assert_eq!(descriptor.services()[0].name, "logger");
    assert_eq!(descriptor.services()[0].argv, vec!["/bin/log"]);
}

#[test]
fn container_with_logger_service() {
    let conn = MockConnection::lxc();
    let config = SandboxConfig::new("web", ["/usr/bin/httpd", "-f"])
        .backend(BackendKind::Container)
        .root_boot("/srv/rootfs")
        .service(ServiceConfig::new("logger", CommandSpec::new(["/bin/log"])));
    let spec = build_domain(&config, &conn).unwrap();

    assert_eq!(spec.console_names(), vec!["console0", "console-logger"]);
    assert!(matches!(spec.boot, DomainBoot::Init { .. }));
    assert_eq!(spec.primary_console().unwrap().guest_path, "/dev/console");
    assert_eq!(spec.console("console-logger").unwrap().guest_path, "/dev/tty2");
    assert_eq!(spec.config_channel.guest_dir, "/run/corral");
    let descriptor = ServiceDescriptor::parse(&spec.config_channel.contents).unwrap();
    assert_eq!(descriptor.len(), 2);
}

#[test]
fn building_is_deterministic() {
    let conn = MockConnection::qemu();
    let config = logger_config()
        .mount(MountSpec::host_bind("/srv/site", "/var/www", MountMode::ReadOnly))
        .mount(MountSpec::ram("/tmp", 65536));
    let first = build_domain(&config, &conn).unwrap();
    let second = build_domain(&config, &conn).unwrap();
    assert_eq!(first, second);
}

#[test]
fn many_services_get_one_console_each() {
    let conn = MockConnection::qemu();
    let config = (0..5).fold(logger_config(), |config, i| {
        config.service(ServiceConfig::new(
            format!("svc{i}"),
            CommandSpec::new(["/bin/true"]),
        ))
    });
    let spec = build_domain(&config, &conn).unwrap();
    assert_eq!(spec.consoles.len(), 1 + config.services.len());

    let mut names = spec.console_names();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), spec.consoles.len());
}

#[test]
fn invalid_configs_fail_before_touching_the_hypervisor() {
    let conn = MockConnection::qemu();

    let empty = SandboxConfig::new("web", Vec::<String>::new())
        .kernel_boot("/boot/vmlinuz", "/boot/initrd.img");
    assert!(matches!(
        build_domain(&empty, &conn),
        Err(Error::InvalidConfig(_))
    ));

    let duplicate =
        logger_config().service(ServiceConfig::new("logger", CommandSpec::new(["/bin/log2"])));
    assert!(matches!(
        build_domain(&duplicate, &conn),
        Err(Error::InvalidConfig(_))
    ));

    let no_boot = SandboxConfig::new("web", ["/bin/sh"]);
    assert!(matches!(
        build_domain(&no_boot, &conn),
        Err(Error::Build(BuildError::MissingBootSource))
    ));

    assert!(conn.defined_domains().is_empty());
}

#[tokio::test]
async fn built_spec_can_be_defined() {
    let conn = MockConnection::qemu();
    let spec = build_domain(&logger_config(), &conn).unwrap();
    let handle = conn.define_domain(&spec).await.unwrap();
    assert_eq!(handle.name(), "web");
    assert_eq!(conn.defined_domains(), vec![spec]);
}

#[test]
fn toml_config_builds() {
    let config = config::from_toml_str(
        r#"
name = "web"

[boot]
type = "disk"
image = { path = "/images/root.qcow2" }

[command]
argv = ["/bin/sh"]

[[services]]
name = "logger"
argv = ["/bin/log"]
"#,
    )
    .unwrap();
    let spec = build_domain(&config, &MockConnection::qemu()).unwrap();
    assert_eq!(spec.console_names(), vec!["console0", "console-logger"]);
    assert_eq!(spec.disks[0].target, "vda");
}

#[test]
fn spec_serializes_for_hypervisor_tooling() {
    let spec = build_domain(&logger_config(), &MockConnection::qemu()).unwrap();
    let json = serde_json::to_value(&spec).unwrap();
    assert_eq!(json["name"], "web");
    assert_eq!(json["consoles"][1]["name"], "console-logger");
    assert_eq!(json["consoles"][1]["guest_path"], "/dev/hvc1");
}
