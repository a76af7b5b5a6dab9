//! Corral sandbox init process (PID 1).
//!
//! This binary runs as PID 1 in the sandbox guest and handles:
//! - Parsing `corral.*` parameters from the kernel cmdline (or its own
//!   arguments inside a container)
//! - Mounting the config channel and the sandbox's filesystems
//! - Launching every service descriptor record on its own console
//! - Zombie reaping, and shutdown once the primary command exits

use corral_protocol::{
    ConsoleScheme, DESCRIPTOR_FILE, GUEST_CONFIG_DIR, ServiceDescriptor, ServiceRecord,
};
use nix::mount::{MsFlags, mount};
use nix::sys::reboot::{RebootMode, reboot};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Gid, Group, Pid, Uid, User, dup2, setsid};
use std::collections::HashMap;
use std::fs::{self, File};
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

mod cmdline;

use cmdline::{InitConfig, parse_cmdline, parse_words};

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Filesystems tried, in order, for block devices.
const DISK_FILESYSTEMS: &[&str] = &["ext4", "xfs", "btrfs", "vfat"];

fn main() {
    if let Err(e) = run() {
        eprintln!("init error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let container = args.iter().any(|a| a.starts_with("corral."));

    if !container {
        // Mount basic filesystems first so /dev/hvc0 exists
        setup_basic_filesystems()?;
        setup_console()?;
    }

    println!("corral-init starting...");

    let config = if container {
        parse_words(args.iter().map(String::as_str))?
    } else {
        parse_cmdline()?
    };
    println!("config: {:?}", config);

    mount_config_channel(&config)?;
    mount_filesystems(&config)?;

    // Must agree with the builder that produced the domain.
    let consoles = if container {
        ConsoleScheme::Container
    } else {
        ConsoleScheme::Virtio
    };

    let descriptor = read_descriptor()?;
    let mut children = HashMap::new();
    let mut primary = None;
    for (index, record) in descriptor.records().iter().enumerate() {
        let pid = spawn_record(record, &consoles.path(index))?;
        println!("{} spawned with pid {}", record.name, pid);
        primary.get_or_insert(pid);
        children.insert(pid, record.name.clone());
    }
    let primary = primary.ok_or("service descriptor has no records")?;

    let status = event_loop(primary, &mut children)?;
    shutdown(container, status)
}

fn mount_and_create(
    source: &str,
    target: &str,
    fstype: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(target)?;
    mount::<str, str, str, str>(Some(source), target, Some(fstype), MsFlags::empty(), None)?;
    Ok(())
}

fn setup_basic_filesystems() -> Result<(), Box<dyn std::error::Error>> {
    mount_and_create("proc", "/proc", "proc")?;
    mount_and_create("sysfs", "/sys", "sysfs")?;
    mount_and_create("devtmpfs", "/dev", "devtmpfs")?;
    mount_and_create("tmpfs", "/tmp", "tmpfs")?;
    mount_and_create("tmpfs", "/run", "tmpfs")?;
    Ok(())
}

fn setup_console() -> Result<(), Box<dyn std::error::Error>> {
    let console = File::options()
        .read(true)
        .write(true)
        .open(ConsoleScheme::Virtio.path(0))?;

    let fd = console.as_raw_fd();
    dup2(fd, 0)?;
    dup2(fd, 1)?;
    dup2(fd, 2)?;

    Ok(())
}

fn read_only_flag(read_only: bool) -> MsFlags {
    if read_only {
        MsFlags::MS_RDONLY
    } else {
        MsFlags::empty()
    }
}

fn share_options(fstype: &str) -> Option<&'static str> {
    (fstype == "9p").then_some("trans=virtio,version=9p2000.L")
}

fn mount_config_channel(config: &InitConfig) -> Result<(), Box<dyn std::error::Error>> {
    let share = config
        .config
        .as_ref()
        .ok_or("no corral.config parameter, cannot find the service descriptor")?;
    if share.is_passthrough() {
        return Ok(());
    }

    println!("mounting config channel {} at {}", share.tag, GUEST_CONFIG_DIR);
    fs::create_dir_all(GUEST_CONFIG_DIR)?;
    mount::<str, str, str, str>(
        Some(share.tag.as_str()),
        GUEST_CONFIG_DIR,
        Some(share.fstype.as_str()),
        MsFlags::MS_RDONLY,
        share_options(&share.fstype),
    )
    .map_err(|e| format!("failed to mount config channel {}: {}", share.tag, e))?;
    Ok(())
}

fn mount_filesystems(config: &InitConfig) -> Result<(), Box<dyn std::error::Error>> {
    for share in &config.mounts {
        println!("mounting {} at {}", share.tag, share.path);
        fs::create_dir_all(&share.path)?;
        mount::<str, str, str, str>(
            Some(share.tag.as_str()),
            &share.path,
            Some(share.fstype.as_str()),
            read_only_flag(share.read_only),
            share_options(&share.fstype),
        )
        .map_err(|e| format!("failed to mount {} at {}: {}", share.tag, share.path, e))?;
    }

    for disk in &config.disks {
        let device = format!("/dev/{}", disk.device);
        println!("mounting {} at {}", device, disk.path);
        fs::create_dir_all(&disk.path)?;
        let mounted = DISK_FILESYSTEMS.iter().any(|fstype| {
            mount::<str, str, str, str>(
                Some(device.as_str()),
                &disk.path,
                Some(*fstype),
                read_only_flag(disk.read_only),
                None,
            )
            .is_ok()
        });
        if !mounted {
            return Err(format!(
                "failed to mount {} at {}: unknown filesystem",
                device, disk.path
            )
            .into());
        }
    }

    for bind in &config.binds {
        println!("binding {} at {}", bind.source, bind.target);
        fs::create_dir_all(&bind.target)?;
        mount::<str, str, str, str>(
            Some(bind.source.as_str()),
            &bind.target,
            None,
            MsFlags::MS_BIND,
            None,
        )
        .map_err(|e| format!("failed to bind {} at {}: {}", bind.source, bind.target, e))?;
    }

    for tmpfs in &config.tmpfs {
        println!("mounting tmpfs at {}", tmpfs.path);
        fs::create_dir_all(&tmpfs.path)?;
        let options = format!("size={}k", tmpfs.size_kib);
        mount::<str, str, str, str>(
            Some("tmpfs"),
            &tmpfs.path,
            Some("tmpfs"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|e| format!("failed to mount tmpfs at {}: {}", tmpfs.path, e))?;
    }

    Ok(())
}

fn read_descriptor() -> Result<ServiceDescriptor, Box<dyn std::error::Error>> {
    let path = Path::new(GUEST_CONFIG_DIR).join(DESCRIPTOR_FILE);
    let text = fs::read_to_string(&path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    Ok(ServiceDescriptor::parse(&text)?)
}

fn resolve_user(name: &str) -> Result<User, Box<dyn std::error::Error>> {
    let user = match name.parse::<u32>() {
        Ok(uid) => User::from_uid(Uid::from_raw(uid))?,
        Err(_) => User::from_name(name)?,
    };
    Ok(user.ok_or_else(|| format!("unknown user '{}'", name))?)
}

fn resolve_group(name: &str) -> Result<Gid, Box<dyn std::error::Error>> {
    if let Ok(gid) = name.parse::<u32>() {
        return Ok(Gid::from_raw(gid));
    }
    let group = Group::from_name(name)?.ok_or_else(|| format!("unknown group '{}'", name))?;
    Ok(group.gid)
}

fn spawn_record(record: &ServiceRecord, console: &str) -> Result<Pid, Box<dyn std::error::Error>> {
    let user = resolve_user(&record.user)?;
    let gid = resolve_group(&record.group)?;

    let tty = File::options().read(true).write(true).open(console)?;

    let mut cmd = Command::new(&record.argv[0]);
    cmd.args(&record.argv[1..])
        .env_clear()
        .env("PATH", DEFAULT_PATH)
        .env("HOME", &user.dir)
        .env("USER", &user.name)
        .env("TERM", "linux")
        .envs(&record.env)
        .current_dir(&record.workdir)
        .stdin(Stdio::from(tty.try_clone()?))
        .stdout(Stdio::from(tty.try_clone()?))
        .stderr(Stdio::from(tty))
        .gid(gid.as_raw())
        .uid(user.uid.as_raw());

    // Each record gets its own session so its console becomes the
    // controlling terminal.
    unsafe {
        cmd.pre_exec(|| {
            setsid()?;
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .map_err(|e| format!("failed to start {} ({}): {}", record.name, record.argv[0], e))?;
    Ok(Pid::from_raw(child.id() as i32))
}

/// Reaps children until the primary record exits and returns its exit code.
fn event_loop(
    primary: Pid,
    children: &mut HashMap<Pid, String>,
) -> Result<i32, Box<dyn std::error::Error>> {
    loop {
        let (pid, code) = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::empty())) {
            Ok(WaitStatus::Exited(pid, status)) => {
                println!("process {} exited with status {}", pid, status);
                (pid, status)
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                println!("process {} killed by signal {:?}", pid, sig);
                (pid, 128 + sig as i32)
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::ECHILD) => {
                println!("no more children, exiting");
                return Ok(0);
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                eprintln!("waitpid error: {}", e);
                continue;
            }
        };

        if let Some(name) = children.remove(&pid) {
            println!("service {} stopped", name);
        }
        if pid == primary {
            println!("main process exited, shutting down");
            for other in children.keys() {
                let _ = signal::kill(*other, Signal::SIGTERM);
            }
            return Ok(code);
        }
    }
}

fn shutdown(container: bool, status: i32) -> Result<(), Box<dyn std::error::Error>> {
    if container {
        std::process::exit(status);
    }

    nix::unistd::sync();
    let Err(e) = reboot(RebootMode::RB_POWER_OFF);
    Err(e.into())
}
