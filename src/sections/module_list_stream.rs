use {super::*, crate::target::Module};

/// Write information about the loaded images. Modules keep the order the
/// target enumerated them in.
pub fn write(buffer: &mut DumpBuf, snapshot: &Snapshot) -> Result<MDRawDirectory> {
    let mut modules = Vec::with_capacity(snapshot.modules.len());
    for module in &snapshot.modules {
        modules.push(fill_raw_module(buffer, module)?);
    }

    let list_header = MemoryWriter::<u32>::alloc_with_val(buffer, modules.len() as u32)?;

    let mut dirent = MDRawDirectory {
        stream_type: MDStreamType::ModuleListStream as u32,
        location: list_header.location(),
    };

    if !modules.is_empty() {
        let mapping_list = MemoryArrayWriter::<MDRawModule>::alloc_from_iter(buffer, modules)?;
        dirent.location.data_size += mapping_list.location().data_size;
    }

    Ok(dirent)
}

fn fill_raw_module(buffer: &mut DumpBuf, module: &Module) -> Result<MDRawModule> {
    let cv_record = match module.build_id.as_deref() {
        // Just zeroes
        None | Some([]) => Default::default(),
        Some(identifier) => {
            let cv_signature = CvSignature::Elf as u32;
            let bytes: Vec<u8> = cv_signature
                .to_le_bytes()
                .iter()
                .chain(identifier)
                .copied()
                .collect();
            MemoryArrayWriter::write_bytes(buffer, &bytes)?.location()
        }
    };

    let name_header = write_string_to_location(buffer, &module.path)?;

    Ok(MDRawModule {
        base_of_image: module.base_address,
        size_of_image: u32::try_from(module.size).unwrap_or(u32::MAX),
        cv_record,
        module_name_rva: name_header.rva,
        ..Default::default()
    })
}
