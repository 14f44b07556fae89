use {
    super::*,
    crate::{cpu, host},
};

pub fn write(buffer: &mut DumpBuf) -> Result<MDRawDirectory> {
    let mut info_section = MemoryWriter::<MDRawSystemInfo>::alloc(buffer)?;
    let dirent = MDRawDirectory {
        stream_type: MDStreamType::SystemInfoStream as u32,
        location: info_section.location(),
    };

    let os = host::os_information();
    let os_version_loc = write_string_to_location(buffer, &os.describe())?;
    let (major_version, minor_version, build_number) = os.version_triple();

    let cpu_info = host::cpu_information();
    let mut cpu = MDCPUInformation { data: [0; 24] };
    if let Some(vendor) = &cpu_info.vendor_id {
        // x86 only, the vendor string takes the first three words
        let bytes = vendor.as_bytes();
        let len = bytes.len().min(12);
        cpu.data[..len].copy_from_slice(&bytes[..len]);
    }

    let info = MDRawSystemInfo {
        processor_architecture: cpu::MINIDUMP_ARCHITECTURE as u16,
        processor_level: cpu_info.family.unwrap_or_default() as u16,
        processor_revision: ((cpu_info.model.unwrap_or_default() << 8)
            | cpu_info.stepping.unwrap_or_default()) as u16,
        number_of_processors: cpu_info.processors.min(u8::MAX as u32) as u8,
        product_type: 0,
        major_version,
        minor_version,
        build_number,
        platform_id: PlatformId::Linux as u32,
        csd_version_rva: os_version_loc.rva,
        suite_mask: 0,
        reserved2: 0,
        cpu,
    };

    info_section.set_value(buffer, info)?;
    Ok(dirent)
}
