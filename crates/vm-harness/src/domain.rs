//! Libvirt domain descriptor construction

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{Error, Result};

/// Shape of a virtual machine to create.
#[derive(Debug, Clone)]
pub struct VmSpec {
    /// Domain name, unique within the hypervisor connection
    pub name: String,
    /// Memory size in MiB
    pub memory_mib: u64,
    /// Number of virtual CPU cores
    pub core_count: u32,
    /// Attached qcow2 disks, in order; the first is the OS disk
    pub disks: Vec<PathBuf>,
}

impl VmSpec {
    /// Describe a VM with a single OS disk.
    pub fn new(
        name: impl Into<String>,
        memory_mib: u64,
        core_count: u32,
        os_disk: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            memory_mib,
            core_count,
            disks: vec![os_disk.into()],
        }
    }

    /// Attach another disk after the OS disk.
    pub fn with_extra_disk(mut self, disk: impl Into<PathBuf>) -> Self {
        self.disks.push(disk.into());
        self
    }
}

/// Build the libvirt domain XML for a spec: a KVM guest with EFI secure-boot
/// firmware, a serial console, SPICE graphics, a virtio NIC on the default
/// network, and one virtio disk per spec entry.
pub fn domain_xml(spec: &VmSpec) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    start(&mut writer, "domain", &[("type", "kvm")])?;
    text_element(&mut writer, "name", &[], &spec.name)?;
    text_element(
        &mut writer,
        "memory",
        &[("unit", "MiB")],
        &spec.memory_mib.to_string(),
    )?;
    text_element(&mut writer, "vcpu", &[], &spec.core_count.to_string())?;

    start(&mut writer, "os", &[("firmware", "efi")])?;
    text_element(&mut writer, "type", &[], "hvm")?;
    end(&mut writer, "os")?;
    empty(
        &mut writer,
        "firmware",
        &[("secure-boot", "yes"), ("enrolled-keys", "yes")],
    )?;

    start(&mut writer, "features", &[])?;
    empty(&mut writer, "acpi", &[])?;
    empty(&mut writer, "apic", &[])?;
    end(&mut writer, "features")?;

    empty(&mut writer, "cpu", &[("mode", "host-passthrough")])?;
    empty(&mut writer, "clock", &[("offset", "utc")])?;
    text_element(&mut writer, "on_poweroff", &[], "destroy")?;
    text_element(&mut writer, "on_reboot", &[], "restart")?;
    text_element(&mut writer, "on_crash", &[], "destroy")?;

    start(&mut writer, "devices", &[])?;

    start(&mut writer, "serial", &[("type", "pty")])?;
    start(&mut writer, "target", &[("type", "isa-serial"), ("port", "0")])?;
    empty(&mut writer, "model", &[("name", "isa-serial")])?;
    end(&mut writer, "target")?;
    end(&mut writer, "serial")?;

    start(&mut writer, "console", &[("type", "pty")])?;
    empty(&mut writer, "target", &[("type", "serial"), ("port", "0")])?;
    end(&mut writer, "console")?;

    start(&mut writer, "video", &[])?;
    empty(&mut writer, "model", &[("type", "qxl")])?;
    end(&mut writer, "video")?;
    empty(&mut writer, "graphics", &[("type", "spice")])?;

    start(&mut writer, "interface", &[("type", "network")])?;
    empty(&mut writer, "source", &[("network", "default")])?;
    empty(&mut writer, "model", &[("type", "virtio")])?;
    end(&mut writer, "interface")?;

    let mut next_disk_indexes = BTreeMap::new();
    for disk in &spec.disks {
        let device = disk_device_name("vd", &mut next_disk_indexes)?;
        write_disk(&mut writer, disk, &device)?;
    }

    end(&mut writer, "devices")?;
    end(&mut writer, "domain")?;

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

fn write_disk<W: std::io::Write>(
    writer: &mut Writer<W>,
    path: &Path,
    device: &str,
) -> Result<()> {
    let file = path.display().to_string();
    start(writer, "disk", &[("type", "file"), ("device", "disk")])?;
    empty(writer, "driver", &[("name", "qemu"), ("type", "qcow2")])?;
    empty(writer, "target", &[("dev", device), ("bus", "virtio")])?;
    empty(writer, "source", &[("file", file.as_str())])?;
    end(writer, "disk")?;
    Ok(())
}

/// Allocate the next device name for a bus prefix.
///
/// The `vd`/`sd` prefixes follow the Linux naming scheme. That continues
/// `aa`, `ab`, ... past `z`, but it is unlikely anyone ever attaches more
/// than 26 disks here, so indexes past 25 are rejected instead.
fn disk_device_name(
    prefix: &str,
    next_disk_indexes: &mut BTreeMap<String, usize>,
) -> Result<String> {
    let next = next_disk_indexes.entry(prefix.to_string()).or_insert(0);
    let index = *next;
    *next += 1;

    match prefix {
        "vd" | "sd" => {
            if index > 25 {
                return Err(Error::DiskIndexExhausted {
                    prefix: prefix.to_string(),
                    index,
                });
            }
            let suffix = (b'a' + index as u8) as char;
            Ok(format!("{prefix}{suffix}"))
        }
        _ => Ok(format!("{prefix}{index}")),
    }
}

fn start<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
) -> Result<()> {
    let mut element = BytesStart::new(name);
    for (key, value) in attrs {
        element.push_attribute((*key, *value));
    }
    writer.write_event(Event::Start(element))?;
    Ok(())
}

fn end<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn empty<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
) -> Result<()> {
    let mut element = BytesStart::new(name);
    for (key, value) in attrs {
        element.push_attribute((*key, *value));
    }
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

fn text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    start(writer, name, attrs)?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    end(writer, name)?;
    Ok(())
}
