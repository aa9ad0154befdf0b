//! The descriptor map: how host-visible resources bind to kernel arguments.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Buffer,
    Pod,
    PodUbo,
    ReadOnlyImage,
    WriteOnlyImage,
    Sampler,
    Local,
}

impl ArgKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArgKind::Buffer => "buffer",
            ArgKind::Pod => "pod",
            ArgKind::PodUbo => "pod_ubo",
            ArgKind::ReadOnlyImage => "ro_image",
            ArgKind::WriteOnlyImage => "wo_image",
            ArgKind::Sampler => "sampler",
            ArgKind::Local => "local",
        }
    }

    pub fn from_name(name: &str) -> Option<ArgKind> {
        [
            ArgKind::Buffer,
            ArgKind::Pod,
            ArgKind::PodUbo,
            ArgKind::ReadOnlyImage,
            ArgKind::WriteOnlyImage,
            ArgKind::Sampler,
            ArgKind::Local,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorEntry {
    Sampler {
        literal: u32,
        expression: String,
        descriptor_set: u32,
        binding: u32,
    },
    Constant {
        descriptor_set: u32,
        /// Initializer bytes as lower-case hex.
        hex_bytes: String,
    },
    KernelArg {
        kernel: String,
        arg: String,
        ordinal: usize,
        descriptor_set: u32,
        binding: u32,
        /// Byte offset within the bound buffer; non-zero only for clustered
        /// plain-old-data arguments.
        offset: u32,
        kind: ArgKind,
    },
    LocalArg {
        kernel: String,
        arg: String,
        ordinal: usize,
        elem_size: u64,
        spec_id: u32,
    },
}

impl fmt::Display for DescriptorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorEntry::Sampler {
                literal,
                expression,
                descriptor_set,
                binding,
            } => write!(
                f,
                "sampler,{},samplerExpr,\"{}\",descriptorSet,{},binding,{}",
                literal, expression, descriptor_set, binding
            ),
            DescriptorEntry::Constant {
                descriptor_set,
                hex_bytes,
            } => write!(
                f,
                "constant,descriptorSet,{},binding,0,kind,buffer,hexbytes,{}",
                descriptor_set, hex_bytes
            ),
            DescriptorEntry::KernelArg {
                kernel,
                arg,
                ordinal,
                descriptor_set,
                binding,
                offset,
                kind,
            } => write!(
                f,
                "kernel,{},arg,{},argOrdinal,{},descriptorSet,{},binding,{},offset,{},argKind,{}",
                kernel,
                arg,
                ordinal,
                descriptor_set,
                binding,
                offset,
                kind.as_str()
            ),
            DescriptorEntry::LocalArg {
                kernel,
                arg,
                ordinal,
                elem_size,
                spec_id,
            } => write!(
                f,
                "kernel,{},arg,{},argOrdinal,{},argKind,local,arrayElemSize,{},arrayNumElemSpecId,{}",
                kernel, arg, ordinal, elem_size, spec_id
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorMap {
    pub entries: Vec<DescriptorEntry>,
}

impl DescriptorMap {
    pub fn push(&mut self, entry: DescriptorEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per entry, each terminated by a newline.
    pub fn render(&self) -> String {
        self.entries.iter().map(|e| format!("{}\n", e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lines() {
        let mut map = DescriptorMap::default();
        map.push(DescriptorEntry::Sampler {
            literal: 18,
            expression: "CLK_FILTER_NEAREST".into(),
            descriptor_set: 0,
            binding: 0,
        });
        map.push(DescriptorEntry::KernelArg {
            kernel: "foo".into(),
            arg: "out".into(),
            ordinal: 0,
            descriptor_set: 1,
            binding: 0,
            offset: 0,
            kind: ArgKind::Buffer,
        });
        map.push(DescriptorEntry::KernelArg {
            kernel: "foo".into(),
            arg: "scale".into(),
            ordinal: 2,
            descriptor_set: 1,
            binding: 1,
            offset: 4,
            kind: ArgKind::Pod,
        });
        map.push(DescriptorEntry::LocalArg {
            kernel: "foo".into(),
            arg: "scratch".into(),
            ordinal: 1,
            elem_size: 4,
            spec_id: 3,
        });
        assert_eq!(
            map.render(),
            "sampler,18,samplerExpr,\"CLK_FILTER_NEAREST\",descriptorSet,0,binding,0\n\
             kernel,foo,arg,out,argOrdinal,0,descriptorSet,1,binding,0,offset,0,argKind,buffer\n\
             kernel,foo,arg,scale,argOrdinal,2,descriptorSet,1,binding,1,offset,4,argKind,pod\n\
             kernel,foo,arg,scratch,argOrdinal,1,argKind,local,arrayElemSize,4,arrayNumElemSpecId,3\n"
        );
    }

    #[test]
    fn test_arg_kind_names() {
        assert_eq!(ArgKind::from_name("pod_ubo"), Some(ArgKind::PodUbo));
        assert_eq!(ArgKind::from_name("ro_image"), Some(ArgKind::ReadOnlyImage));
        assert_eq!(ArgKind::from_name("image"), None);
    }
}
