use crate::builder::DescriptorSet;
use failure::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Renders a descriptor set as a Rust module of static byte arrays, for
/// firmware that wants its descriptors in read-only memory.
pub struct DescriptorModule<'a> {
    name: &'a str,
    descriptors: &'a DescriptorSet,
}

impl<'a> DescriptorModule<'a> {
    pub fn new(name: &'a str, descriptors: &'a DescriptorSet) -> Self {
        Self { name, descriptors }
    }

    fn write_blob(&self, f: &mut fmt::Formatter, const_name: &str, blob: &[u8]) -> fmt::Result {
        write!(f, "    pub static {}: [u8; {}] = [", const_name, blob.len())?;
        for (i, b) in blob.iter().enumerate() {
            if i % 12 == 0 {
                write!(f, "\n        ")?;
            }
            write!(f, "0x{:02x}, ", b)?;
        }
        writeln!(f, "\n    ];")?;
        Ok(())
    }

    fn write_string_lookup(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "    pub fn string_descriptor(index: u8) -> Option<&'static [u8]> {{")?;
        writeln!(f, "        match index {{")?;
        for id in self.descriptors.string_descriptors.keys() {
            writeln!(f, "            {} => Some(&STRING_DESCRIPTOR_{}),", id, id)?;
        }
        writeln!(f, "            _ => None,")?;
        writeln!(f, "        }}")?;
        writeln!(f, "    }}")?;
        Ok(())
    }
}

impl<'a> Display for DescriptorModule<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "pub mod {} {{", self.name)?;
        writeln!(f, "    pub const CONFIGURATION_VALUE: u8 = {};", self.descriptors.configuration_value)?;
        writeln!(f, "    pub const MAX_PACKET_SIZE_0: u8 = {};", self.descriptors.max_packet_size_0)?;
        self.write_blob(f, "DEVICE_DESCRIPTOR", &self.descriptors.device_descriptor)?;
        self.write_blob(f, "CONFIGURATION_DESCRIPTOR", &self.descriptors.configuration_descriptor)?;
        for (id, descriptor) in &self.descriptors.string_descriptors {
            let name = format!("STRING_DESCRIPTOR_{}", id);
            self.write_blob(f, &name, descriptor)?;
        }
        self.write_string_lookup(f)?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

pub fn generate_file(filename: impl AsRef<Path>, name: &str, descriptors: &DescriptorSet) -> Result<(), Error> {
    let mut file = fs::File::create(filename)?;
    write!(file, "{}", DescriptorModule::new(name, descriptors))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{Identity, Variant};

    #[test]
    fn module_lists_every_descriptor() {
        let set = Variant::Vendor.descriptors(&Identity::default()).unwrap();
        let text = DescriptorModule::new("vendor_descriptors", &set).to_string();

        assert!(text.starts_with("pub mod vendor_descriptors {"));
        assert!(text.contains("pub static DEVICE_DESCRIPTOR: [u8; 18]"));
        assert!(text.contains("pub static CONFIGURATION_DESCRIPTOR: [u8; 32]"));
        assert!(text.contains("pub static STRING_DESCRIPTOR_0: [u8; 4]"));
        assert!(text.contains("5 => Some(&STRING_DESCRIPTOR_5),"));
        assert!(!text.contains("STRING_DESCRIPTOR_6"));
        assert!(text.contains("0x12, 0x01, 0x00, 0x02, 0xff, 0x02, 0x01, 0x40, 0xad, 0xde,"));
    }

    #[test]
    fn writes_file() {
        let set = Variant::CdcAcm { notification: true }
            .descriptors(&Identity::default())
            .unwrap();
        let path = std::env::temp_dir().join(format!("usb-vcp-descriptors-{}.rs", std::process::id()));
        generate_file(&path, "vcp", &set).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(text.contains("pub static CONFIGURATION_DESCRIPTOR: [u8; 75]"));
    }
}
