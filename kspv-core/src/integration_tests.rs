#[cfg(test)]
mod tests {
    use spirv::{Decoration, GLOp, Op, StorageClass};

    use crate::instruction::{self, literal, Instruction, Operand};
    use crate::{compile, readback, writer, Options, Output, ProducerError, SamplerMap};

    const FILL: &str = r#"
func kernel @fill(%out: ptr[global]<f32>, %v: f32) -> void {
entry:
  %p = gep ptr[global]<f32> %out, 0i32
  store %v, %p
  ret
}
"#;

    fn build(source: &str) -> Output {
        let result = compile(source, &Options::default());
        assert!(result.is_ok(), "Compilation failed: {:?}", result.err());
        result.unwrap()
    }

    fn build_with(source: &str, options: &Options) -> Output {
        let result = compile(source, options);
        assert!(result.is_ok(), "Compilation failed: {:?}", result.err());
        result.unwrap()
    }

    fn with_opcode(output: &Output, opcode: Op) -> Vec<&Instruction> {
        output.module.with_opcode(opcode).collect()
    }

    fn decorations(output: &Output, decoration: Decoration) -> Vec<&Instruction> {
        output
            .module
            .with_opcode(Op::Decorate)
            .filter(|i| i.operands.get(1).and_then(literal) == Some(decoration as u32))
            .collect()
    }

    #[test]
    fn test_trivial_kernel() {
        let output = build(FILL);
        let module = &output.module;

        assert_eq!(module.instructions[0].class.opcode, Op::Capability);
        assert_eq!(module.instructions[0].operands, vec![Operand::LiteralBit32(spirv::Capability::Shader as u32)]);
        assert_eq!(module.count(Op::ExtInstImport), 0);
        assert_eq!(module.count(Op::MemoryModel), 1);

        let function = with_opcode(&output, Op::Function)[0];
        let entry = with_opcode(&output, Op::EntryPoint)[0];
        assert_eq!(entry.operands[1], Operand::IdRef(function.result_id.unwrap()));
        assert_eq!(entry.operands[2], Operand::from("fill"));

        // One runtime array for the buffer, a wrapper struct per argument.
        assert_eq!(module.count(Op::TypeRuntimeArray), 1);
        assert_eq!(module.count(Op::TypeStruct), 2);
        assert_eq!(decorations(&output, Decoration::Block).len(), 2);
        assert_eq!(module.count(Op::Variable), 2);

        // The pod argument is loaded through its wrapper, the store goes
        // through the buffer's access chain.
        let store = with_opcode(&output, Op::Store)[0];
        assert_eq!(store.operands, vec![Operand::IdRef(18), Operand::IdRef(17)]);
        assert_eq!(module.bound, 19);

        assert_eq!(
            output.descriptor_map.render(),
            "kernel,fill,arg,out,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n\
             kernel,fill,arg,v,argOrdinal,1,descriptorSet,0,binding,1,offset,0,argKind,pod\n"
        );
    }

    #[test]
    fn test_sections_in_order() {
        let output = build(FILL);
        let module = &output.module;
        let pos = |op| module.position(op).unwrap();
        assert!(pos(Op::Capability) < pos(Op::MemoryModel));
        assert!(pos(Op::MemoryModel) < pos(Op::EntryPoint));
        assert!(pos(Op::EntryPoint) < pos(Op::Source));
        assert!(pos(Op::Source) < pos(Op::Decorate));
        assert!(pos(Op::Decorate) < pos(Op::TypeFloat));
        assert!(pos(Op::TypeFunction) < pos(Op::Variable));
        assert!(pos(Op::Variable) < pos(Op::Function));
    }

    #[test]
    fn test_pod_args_in_uniform_buffer() {
        let options = Options {
            pod_args_in_uniform_buffer: true,
            ..Options::default()
        };
        let output = build_with(FILL, &options);
        assert!(output.descriptor_map.render().ends_with("argKind,pod_ubo\n"));
        let uniform_vars = output
            .module
            .with_opcode(Op::Variable)
            .filter(|v| v.operands[0] == Operand::LiteralBit32(StorageClass::Uniform as u32))
            .count();
        assert_eq!(uniform_vars, 1);
    }

    #[test]
    fn test_packed_char4_constant() {
        let source = r#"
func kernel @pack(%out: ptr[global]<<4 x i8>>, %words: ptr[global]<i32>) -> void {
entry:
  %p = gep ptr[global]<<4 x i8>> %out, 0i32
  store agg(<4 x i8>)[1i8, 2i8, 3i8, 4i8], %p
  %q = gep ptr[global]<i32> %words, 0i32
  store 16909060i32, %q
  ret
}
"#;
        let output = build(source);
        let packed: Vec<_> = output
            .module
            .with_opcode(Op::Constant)
            .filter(|c| c.operands.first().and_then(literal) == Some(0x0102_0304))
            .collect();
        // The equal i32 constant reuses the packed one.
        assert_eq!(packed.len(), 1);
        let id = packed[0].result_id.unwrap();
        let stores = with_opcode(&output, Op::Store);
        assert_eq!(stores.len(), 2);
        assert!(stores.iter().all(|s| s.operands[1] == Operand::IdRef(id)));

        // i8 and i32 share one declaration and char4 has none of its own.
        assert_eq!(output.module.count(Op::TypeInt), 1);
        assert_eq!(output.module.count(Op::TypeVector), 0);
    }

    #[test]
    fn test_constant_and_global_pointers_alias() {
        let source = r#"
func kernel @copy(%dst: ptr[global]<f32>, %src: ptr[constant]<f32>) -> void {
entry:
  %s = gep ptr[constant]<f32> %src, 0i32
  %v = load f32 %s
  %d = gep ptr[global]<f32> %dst, 0i32
  store %v, %d
  ret
}
"#;
        let output = build(source);
        let f32_id = with_opcode(&output, Op::TypeFloat)[0].result_id.unwrap();
        let buffer_pointers = output
            .module
            .with_opcode(Op::TypePointer)
            .filter(|p| {
                p.operands
                    == vec![
                        Operand::LiteralBit32(StorageClass::StorageBuffer as u32),
                        Operand::IdRef(f32_id),
                    ]
            })
            .count();
        assert_eq!(buffer_pointers, 1);
        assert_eq!(output.module.count(Op::TypeRuntimeArray), 1);
        assert_eq!(output.module.count(Op::Variable), 2);
        assert_eq!(decorations(&output, Decoration::NonWritable).len(), 1);
    }

    #[test]
    fn test_local_argument() {
        let source = r#"
func kernel @scratch(%tmp: ptr[local]<f32>, %out: ptr[global]<f32>) -> void {
entry:
  %v = load f32 %tmp
  %p = gep ptr[global]<f32> %out, 0i32
  store %v, %p
  ret
}
"#;
        let output = build(source);
        let module = &output.module;

        // Size, array type, pointer type, variable and first element pointer
        // take five consecutive ids.
        let size = module.definition(1).unwrap();
        assert_eq!(size.class.opcode, Op::SpecConstant);
        assert_eq!(size.operands[0], Operand::LiteralBit32(1));
        let array = module.definition(2).unwrap();
        assert_eq!(array.class.opcode, Op::TypeArray);
        assert_eq!(array.operands[1], Operand::IdRef(1));
        let pointer = module.definition(3).unwrap();
        assert_eq!(pointer.class.opcode, Op::TypePointer);
        assert_eq!(
            pointer.operands,
            vec![Operand::LiteralBit32(StorageClass::Workgroup as u32), Operand::IdRef(2)]
        );
        let var = module.definition(4).unwrap();
        assert_eq!(var.class.opcode, Op::Variable);
        assert_eq!(var.result_type, Some(3));
        let first = module.definition(5).unwrap();
        assert_eq!(first.class.opcode, Op::AccessChain);
        assert_eq!(first.operands[0], Operand::IdRef(4));

        let spec_ids = decorations(&output, Decoration::SpecId);
        assert_eq!(spec_ids.len(), 1);
        assert_eq!(spec_ids[0].operands[0], Operand::IdRef(1));
        assert_eq!(spec_ids[0].operands[2], Operand::LiteralBit32(3));

        assert_eq!(
            output.descriptor_map.render(),
            "kernel,scratch,arg,tmp,argOrdinal,0,argKind,local,arrayElemSize,4,arrayNumElemSpecId,3\n\
             kernel,scratch,arg,out,argOrdinal,1,descriptorSet,0,binding,0,offset,0,argKind,buffer\n"
        );
    }

    const WORKGROUP_SIZE_GLOBAL: &str =
        "global @__spirv_WorkgroupSize : ptr[input]<<3 x i32>>\n";

    #[test]
    fn test_required_workgroup_size_shared() {
        let source = format!(
            "{}{}",
            WORKGROUP_SIZE_GLOBAL,
            r#"
func kernel reqd_work_group_size(8, 1, 1) @a() -> void {
entry:
  ret
}

func kernel reqd_work_group_size(8, 1, 1) @b() -> void {
entry:
  ret
}
"#
        );
        let output = build(&source);
        let composites = with_opcode(&output, Op::ConstantComposite);
        assert_eq!(composites.len(), 1);
        let builtin = decorations(&output, Decoration::BuiltIn);
        assert_eq!(builtin.len(), 1);
        assert_eq!(builtin[0].operands[0], Operand::IdRef(composites[0].result_id.unwrap()));
        assert_eq!(
            builtin[0].operands[2],
            Operand::LiteralBit32(spirv::BuiltIn::WorkgroupSize as u32)
        );

        let modes = with_opcode(&output, Op::ExecutionMode);
        assert_eq!(modes.len(), 2);
        assert_eq!(&modes[0].operands[2..], &[Operand::LiteralBit32(8), Operand::LiteralBit32(1), Operand::LiteralBit32(1)]);
        assert_eq!(output.module.count(Op::SpecConstant), 0);
    }

    #[test]
    fn test_workgroup_size_mismatch() {
        let source = format!(
            "{}{}",
            WORKGROUP_SIZE_GLOBAL,
            r#"
func kernel reqd_work_group_size(8, 1, 1) @a() -> void {
entry:
  ret
}

func kernel reqd_work_group_size(4, 1, 1) @b() -> void {
entry:
  ret
}
"#
        );
        let err = compile(&source, &Options::default()).unwrap_err();
        assert!(matches!(err, ProducerError::Inconsistent(..)));
        assert!(err
            .to_string()
            .contains("reqd_work_group_size must be the same across all kernels"));
    }

    #[test]
    fn test_workgroup_size_partially_required() {
        let source = format!(
            "{}{}",
            WORKGROUP_SIZE_GLOBAL,
            r#"
func kernel reqd_work_group_size(8, 1, 1) @a() -> void {
entry:
  ret
}

func kernel @b() -> void {
entry:
  ret
}
"#
        );
        let err = compile(&source, &Options::default()).unwrap_err();
        assert!(err
            .to_string()
            .contains("Kernels should have consistent work group size definition"));
    }

    #[test]
    fn test_specialized_workgroup_size() {
        let source = format!(
            "{}{}",
            WORKGROUP_SIZE_GLOBAL,
            r#"
func kernel @a() -> void {
entry:
  ret
}
"#
        );
        let output = build(&source);
        let dims = with_opcode(&output, Op::SpecConstant);
        assert_eq!(dims.len(), 3);
        assert_eq!(output.module.count(Op::SpecConstantComposite), 1);
        assert_eq!(output.module.count(Op::ExecutionMode), 0);

        let spec_ids = decorations(&output, Decoration::SpecId);
        for (n, (decoration, dim)) in spec_ids.iter().zip(&dims).enumerate() {
            assert_eq!(decoration.operands[0], Operand::IdRef(dim.result_id.unwrap()));
            assert_eq!(decoration.operands[2], Operand::LiteralBit32(n as u32));
        }

        // The builtin variable is an interface of the entry point.
        let entry = with_opcode(&output, Op::EntryPoint)[0];
        assert_eq!(entry.operands.len(), 4);
    }

    #[test]
    fn test_loop_merge_and_phi() {
        let source = r#"
func kernel @count(%out: ptr[global]<i32>, %n: i32) -> void {
entry:
  br header

header:
  %i = phi i32 [0i32, entry], [%next, body]
  %done = icmp.sge i1 %i, %n
  br_if %done, exit, body

body:
  %next = add i32 %i, 1i32
  br header

exit:
  %p = gep ptr[global]<i32> %out, 0i32
  store %i, %p
  ret
}
"#;
        let output = build(source);
        let module = &output.module;
        let labels: Vec<u32> = module
            .with_opcode(Op::Label)
            .map(|l| l.result_id.unwrap())
            .collect();
        assert_eq!(labels.len(), 4);
        let (entry, header, body, exit) = (labels[0], labels[1], labels[2], labels[3]);

        let merge_at = module.position(Op::LoopMerge).unwrap();
        let merge = &module.instructions[merge_at];
        assert_eq!(
            merge.operands,
            vec![Operand::IdRef(exit), Operand::IdRef(body), Operand::LiteralBit32(0)]
        );
        assert_eq!(module.instructions[merge_at + 1].class.opcode, Op::BranchConditional);
        assert_eq!(module.count(Op::SelectionMerge), 0);
        assert_eq!(module.count(Op::Branch), 2);

        let header_at = module
            .instructions
            .iter()
            .position(|i| i.class.opcode == Op::Label && i.result_id == Some(header))
            .unwrap();
        let phi = &module.instructions[header_at + 1];
        assert_eq!(phi.class.opcode, Op::Phi);
        assert_eq!(phi.operands[1], Operand::IdRef(entry));
        assert_eq!(phi.operands[3], Operand::IdRef(body));
    }

    #[test]
    fn test_selection_merge() {
        let source = r#"
func kernel @clamp(%out: ptr[global]<i32>, %n: i32) -> void {
entry:
  %neg = icmp.slt i1 %n, 0i32
  br_if %neg, zero, done

zero:
  br done

done:
  %v = phi i32 [0i32, zero], [%n, entry]
  %p = gep ptr[global]<i32> %out, 0i32
  store %v, %p
  ret
}
"#;
        let output = build(source);
        let module = &output.module;
        let labels: Vec<u32> = module
            .with_opcode(Op::Label)
            .map(|l| l.result_id.unwrap())
            .collect();
        let merge_at = module.position(Op::SelectionMerge).unwrap();
        assert_eq!(
            module.instructions[merge_at].operands,
            vec![Operand::IdRef(labels[2]), Operand::LiteralBit32(0)]
        );
        assert_eq!(module.instructions[merge_at + 1].class.opcode, Op::BranchConditional);
        assert_eq!(module.count(Op::LoopMerge), 0);
    }

    #[test]
    fn test_extended_instructions() {
        let source = r#"
func kernel @math(%out: ptr[global]<f32>, %bits: ptr[global]<i32>, %x: f32, %y: i32) -> void {
entry:
  %s = call f32 @_Z3sinf(%x)
  %p = gep ptr[global]<f32> %out, 0i32
  store %s, %p
  %c = call i32 @_Z3clzj(%y)
  %q = gep ptr[global]<i32> %bits, 0i32
  store %c, %q
  ret
}
"#;
        let output = build(source);
        let module = &output.module;

        let imports = with_opcode(&output, Op::ExtInstImport);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].operands, vec![Operand::from("GLSL.std.450")]);

        let ext = with_opcode(&output, Op::ExtInst);
        assert_eq!(ext.len(), 2);
        assert_eq!(ext[0].operands[1], Operand::LiteralBit32(GLOp::Sin as u32));
        assert_eq!(ext[1].operands[1], Operand::LiteralBit32(GLOp::FindUMsb as u32));

        // clz is 31 - FindUMsb, in the id right after the extended instruction.
        let sub = with_opcode(&output, Op::ISub)[0];
        let msb = ext[1].result_id.unwrap();
        assert_eq!(sub.result_id, Some(msb + 1));
        assert_eq!(sub.operands[1], Operand::IdRef(msb));
        let thirty_one = match sub.operands[0] {
            Operand::IdRef(id) => module.definition(id).unwrap(),
            ref other => panic!("unexpected operand {:?}", other),
        };
        assert_eq!(thirty_one.operands[0], Operand::LiteralBit32(31));

        let stores = with_opcode(&output, Op::Store);
        assert_eq!(stores[1].operands[1], Operand::IdRef(msb + 1));
    }

    #[test]
    fn test_unknown_atomic_rejected() {
        let source = r#"
func kernel @bump(%out: ptr[global]<i32>) -> void {
entry:
  %p = gep ptr[global]<i32> %out, 0i32
  %r = call i32 @spirv.atomic_frobnicate(%p, 1i32)
  ret
}
"#;
        let err = compile(source, &Options::default()).unwrap_err();
        assert!(matches!(err, ProducerError::Unsupported(..)), "{err:?}");
    }

    const SAMPLED: &str = r#"
func kernel @s(%out: ptr[global]<i32>) -> void {
entry:
  %smp = call sampler_t @__translate_sampler_initializer(18i32)
  %p = gep ptr[global]<i32> %out, 0i32
  store 1i32, %p
  ret
}
"#;

    #[test]
    fn test_sampler_map() {
        let options = Options {
            sampler_map: SamplerMap::parse("18,CLK_ADDRESS_NONE|CLK_FILTER_NEAREST\n").unwrap(),
            ..Options::default()
        };
        let output = build_with(SAMPLED, &options);
        assert_eq!(
            output.descriptor_map.render(),
            "sampler,18,samplerExpr,\"CLK_ADDRESS_NONE|CLK_FILTER_NEAREST\",descriptorSet,0,binding,0\n\
             kernel,s,arg,out,argOrdinal,0,descriptorSet,1,binding,0,offset,0,argKind,buffer\n"
        );
        assert_eq!(output.module.count(Op::TypeSampler), 1);

        let sampler_var = output
            .module
            .with_opcode(Op::Variable)
            .find(|v| v.operands[0] == Operand::LiteralBit32(StorageClass::UniformConstant as u32))
            .unwrap();
        let load = with_opcode(&output, Op::Load)[0];
        assert_eq!(load.operands[0], Operand::IdRef(sampler_var.result_id.unwrap()));
    }

    #[test]
    fn test_sampler_literal_without_map() {
        let err = compile(SAMPLED, &Options::default()).unwrap_err();
        assert!(err.to_string().contains("Sampler literal in source without sampler map!"));
    }

    #[test]
    fn test_sampler_literal_not_in_map() {
        let options = Options {
            sampler_map: SamplerMap::parse("1,CLK_FILTER_NEAREST").unwrap(),
            ..Options::default()
        };
        let err = compile(SAMPLED, &options).unwrap_err();
        assert!(err
            .to_string()
            .contains("Sampler literal 18 was not found in sampler map!"));
    }

    const LOOKUP: &str = r#"
global @table : ptr[constant]<[4 x i32]> = agg([4 x i32])[1i32, 2i32, 3i32, 4i32]

func kernel @lookup(%out: ptr[global]<i32>, %i: i32) -> void {
entry:
  %src = gep ptr[constant]<i32> @table, 0i32, %i
  %v = load i32 %src
  %dst = gep ptr[global]<i32> %out, 0i32
  store %v, %dst
  ret
}
"#;

    #[test]
    fn test_module_constants_become_private() {
        let output = build(LOOKUP);
        let private = output
            .module
            .with_opcode(Op::Variable)
            .find(|v| v.operands[0] == Operand::LiteralBit32(StorageClass::Private as u32))
            .unwrap();
        assert_eq!(private.operands.len(), 2);
        let init = match private.operands[1] {
            Operand::IdRef(id) => output.module.definition(id).unwrap(),
            ref other => panic!("unexpected operand {:?}", other),
        };
        assert_eq!(init.class.opcode, Op::ConstantComposite);
        assert!(!output.descriptor_map.render().contains("constant,"));
        // Array of four: ArrayStride 4 on the array type.
        let strides = decorations(&output, Decoration::ArrayStride);
        assert!(strides.iter().all(|d| d.operands[2] == Operand::LiteralBit32(4)));
    }

    #[test]
    fn test_module_constants_in_storage_buffer() {
        let options = Options {
            module_constants_in_storage_buffer: true,
            ..Options::default()
        };
        let output = build_with(LOOKUP, &options);
        let lines: Vec<String> = output
            .descriptor_map
            .render()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(
            lines[0],
            "constant,descriptorSet,0,binding,0,kind,buffer,hexbytes,01000000020000000300000004000000"
        );
        assert!(lines[1].contains("descriptorSet,1,binding,0"));
        assert_eq!(
            output
                .module
                .with_opcode(Op::Variable)
                .filter(|v| v.operands[0] == Operand::LiteralBit32(StorageClass::Private as u32))
                .count(),
            0
        );
    }

    #[test]
    fn test_module_constant_capacity() {
        let source = r#"
global @big : ptr[constant]<[16385 x i32]> = null([16385 x i32])

func kernel @k(%out: ptr[global]<i32>) -> void {
entry:
  %src = gep ptr[constant]<i32> @big, 0i32, 0i32
  %v = load i32 %src
  %dst = gep ptr[global]<i32> %out, 0i32
  store %v, %dst
  ret
}
"#;
        let options = Options {
            module_constants_in_storage_buffer: true,
            ..Options::default()
        };
        let err = compile(source, &options).unwrap_err();
        assert!(err.to_string().contains("Max __constant capacity of 65536 bytes exceeded"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let a = writer::write_binary(&build(LOOKUP).module);
        let b = writer::write_binary(&build(LOOKUP).module);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bound_patched_in_headers() {
        let output = build(FILL);
        let bytes = writer::write_binary(&output.module);
        assert_eq!(&bytes[..4], &spirv::MAGIC_NUMBER.to_le_bytes());
        assert_eq!(
            &bytes[writer::BINARY_BOUND_OFFSET..writer::BINARY_BOUND_OFFSET + 4],
            &output.module.bound.to_le_bytes()
        );

        let asm = writer::write_assembly(&output.module);
        let bound_line = asm.lines().nth(3).unwrap();
        assert_eq!(bound_line.trim_end(), format!("; Bound: {}", output.module.bound));
        assert!(asm.contains("OpEntryPoint GLCompute %14 \"fill\""));
    }

    #[test]
    fn test_binary_reads_back() {
        let output = build(FILL);
        let bytes = writer::write_binary(&output.module);
        let module = readback::load_bytes(&bytes).unwrap();
        let summary = readback::summarize(&module);
        assert_eq!(summary.entry_points, vec!["fill".to_string()]);
        assert_eq!(summary.functions, 1);
        assert_eq!(summary.bound, output.module.bound);
    }

    /// Literal value of the constant an id operand refers to.
    fn constant_value(output: &Output, operand: &Operand) -> Option<u32> {
        match operand {
            Operand::IdRef(id) => output
                .module
                .definition(*id)
                .and_then(|c| c.operands.first())
                .and_then(literal),
            _ => None,
        }
    }

    /// Opcodes strictly between the first `from` and the first `to`.
    fn opcodes_between(output: &Output, from: Op, to: Op) -> Vec<Op> {
        let module = &output.module;
        let start = module.position(from).unwrap();
        let end = module.position(to).unwrap();
        module.instructions[start + 1..end]
            .iter()
            .map(|i| i.class.opcode)
            .collect()
    }

    #[test]
    fn test_empty_kernel_exact_output() {
        let source = r#"
func kernel @empty() -> void {
entry:
  ret
}
"#;
        let output = build(source);
        let expected = vec![
            instruction::build(
                Op::Capability,
                vec![Operand::LiteralBit32(spirv::Capability::Shader as u32)],
            ),
            instruction::build(
                Op::MemoryModel,
                vec![
                    Operand::LiteralBit32(spirv::AddressingModel::Logical as u32),
                    Operand::LiteralBit32(spirv::MemoryModel::GLSL450 as u32),
                ],
            ),
            instruction::build(
                Op::EntryPoint,
                vec![
                    Operand::LiteralBit32(spirv::ExecutionModel::GLCompute as u32),
                    Operand::IdRef(3),
                    Operand::from("empty"),
                ],
            ),
            instruction::build(
                Op::Source,
                vec![
                    Operand::LiteralBit32(spirv::SourceLanguage::OpenCL_C as u32),
                    Operand::LiteralBit32(120),
                ],
            ),
            instruction::build_with_result(Op::TypeVoid, 1, vec![]),
            instruction::build_with_result(Op::TypeFunction, 2, vec![Operand::IdRef(1)]),
            instruction::build_with_result(
                Op::Function,
                3,
                vec![Operand::IdRef(1), Operand::LiteralBit32(0), Operand::IdRef(2)],
            ),
            instruction::build_with_result(Op::Label, 4, vec![]),
            instruction::build(Op::Return, vec![]),
            instruction::build(Op::FunctionEnd, vec![]),
        ];
        assert_eq!(output.module.instructions, expected);
        assert_eq!(output.module.bound, 5);
        assert!(output.descriptor_map.is_empty());
    }

    #[test]
    fn test_pointer_offset_needs_variable_pointers() {
        let source = r#"
func kernel @shifted(%out: ptr[global]<f32>, %i: i32) -> void {
entry:
  %p = gep ptr[global]<f32> %out, %i
  %q = gep ptr[global]<f32> %p, 1i32
  store 1.0f32, %q
  ret
}
"#;
        let output = build(source);
        let module = &output.module;

        // The pod argument's field access comes first.
        let chain = *with_opcode(&output, Op::AccessChain).last().unwrap();
        let ptr_chains = with_opcode(&output, Op::PtrAccessChain);
        assert_eq!(ptr_chains.len(), 1);
        assert_eq!(ptr_chains[0].operands[0], Operand::IdRef(chain.result_id.unwrap()));
        assert_eq!(constant_value(&output, &ptr_chains[0].operands[1]), Some(1));

        let capabilities: Vec<_> = with_opcode(&output, Op::Capability)
            .iter()
            .map(|c| c.operands[0].clone())
            .collect();
        assert!(capabilities
            .contains(&Operand::LiteralBit32(spirv::Capability::VariablePointers as u32)));
        let extensions: Vec<_> = with_opcode(&output, Op::Extension)
            .iter()
            .map(|e| e.operands[0].clone())
            .collect();
        assert_eq!(
            extensions,
            vec![
                Operand::from("SPV_KHR_storage_buffer_storage_class"),
                Operand::from("SPV_KHR_variable_pointers"),
            ]
        );

        // The pointer the offset steps over carries the element stride.
        let pointer = ptr_chains[0].result_type.unwrap();
        assert_eq!(module.definition(pointer).unwrap().class.opcode, Op::TypePointer);
        let strides: Vec<_> = decorations(&output, Decoration::ArrayStride)
            .into_iter()
            .filter(|d| d.operands[0] == Operand::IdRef(pointer))
            .collect();
        assert_eq!(strides.len(), 1);
        assert_eq!(strides[0].operands[2], Operand::LiteralBit32(4));
    }

    #[test]
    fn test_boolean_xor() {
        let source = r#"
func kernel @flip(%out: ptr[global]<i32>, %a: i32, %b: i32) -> void {
entry:
  %lt = icmp.slt i1 %a, %b
  %pos = icmp.sgt i1 %a, 0i32
  %not = xor i1 %lt, true
  %ne = xor i1 %lt, %pos
  %x = select i32 %not, 1i32, 2i32
  %y = select i32 %ne, %x, 3i32
  %p = gep ptr[global]<i32> %out, 0i32
  store %y, %p
  ret
}
"#;
        let output = build(source);
        let lt = with_opcode(&output, Op::SLessThan)[0].result_id.unwrap();
        let pos = with_opcode(&output, Op::SGreaterThan)[0].result_id.unwrap();

        // Xor with a constant true negates the other operand.
        let nots = with_opcode(&output, Op::LogicalNot);
        assert_eq!(nots.len(), 1);
        assert_eq!(nots[0].operands, vec![Operand::IdRef(lt)]);
        assert_eq!(output.module.count(Op::ConstantTrue), 0);

        let not_equal = with_opcode(&output, Op::LogicalNotEqual);
        assert_eq!(not_equal.len(), 1);
        assert_eq!(not_equal[0].operands, vec![Operand::IdRef(lt), Operand::IdRef(pos)]);
        assert_eq!(output.module.count(Op::BitwiseXor), 0);
    }

    #[test]
    fn test_bool_extension_selects() {
        let source = r#"
func kernel @widen(%out: ptr[global]<i32>, %a: i32) -> void {
entry:
  %zero = icmp.eq i1 %a, 0i32
  %s = sext i32 %zero
  %z = zext i32 %zero
  %sum = add i32 %s, %z
  %p = gep ptr[global]<i32> %out, 0i32
  store %sum, %p
  ret
}
"#;
        let output = build(source);
        let cond = with_opcode(&output, Op::IEqual)[0].result_id.unwrap();
        let selects = with_opcode(&output, Op::Select);
        assert_eq!(selects.len(), 2);
        assert_eq!(output.module.count(Op::SConvert), 0);
        assert_eq!(output.module.count(Op::UConvert), 0);

        let arms = |select: &Instruction| {
            assert_eq!(select.operands[0], Operand::IdRef(cond));
            (
                constant_value(&output, &select.operands[1]),
                constant_value(&output, &select.operands[2]),
            )
        };
        assert_eq!(arms(selects[0]), (Some(0xFFFF_FFFF), Some(0)));
        assert_eq!(arms(selects[1]), (Some(1), Some(0)));
    }

    #[test]
    fn test_truncate_to_char_masks() {
        let source = r#"
func kernel @narrow(%out: ptr[global]<i32>, %a: i32) -> void {
entry:
  %t = trunc i8 %a
  %w = zext i32 %t
  %p = gep ptr[global]<i32> %out, 0i32
  store %w, %p
  ret
}
"#;
        let output = build(source);
        let masks = with_opcode(&output, Op::BitwiseAnd);
        assert_eq!(masks.len(), 1);
        assert_eq!(constant_value(&output, &masks[0].operands[1]), Some(255));
        // The truncation itself is no conversion; only the zext is.
        assert_eq!(output.module.count(Op::UConvert), 1);
        assert_eq!(output.module.count(Op::TypeInt), 1);
    }

    #[test]
    fn test_packed_char4_lane_access() {
        let source = r#"
func kernel @lanes(%buf: ptr[global]<<4 x i8>>, %i: i32) -> void {
entry:
  %p = gep ptr[global]<<4 x i8>> %buf, 0i32
  %v = load <4 x i8> %p
  %e = extractelement i8 %v, %i
  %w = insertelement <4 x i8> %v, %e, 2i32
  store %w, %p
  ret
}
"#;
        let output = build(source);
        assert_eq!(
            opcodes_between(&output, Op::Load, Op::Store)
                .into_iter()
                .skip_while(|&op| op != Op::IMul)
                .collect::<Vec<_>>(),
            vec![
                Op::IMul,
                Op::ShiftRightLogical,
                Op::BitwiseAnd,
                Op::ShiftLeftLogical,
                Op::Not,
                Op::BitwiseAnd,
                Op::ShiftLeftLogical,
                Op::BitwiseOr,
            ]
        );

        // A dynamic lane is scaled by eight bits.
        let scale = with_opcode(&output, Op::IMul)[0];
        assert_eq!(constant_value(&output, &scale.operands[1]), Some(8));
        let extracted = with_opcode(&output, Op::BitwiseAnd)[0];
        assert_eq!(constant_value(&output, &extracted.operands[1]), Some(0xFF));

        // Lane 2 is a constant shift of sixteen for both the mask and the
        // inserted byte.
        let shifts = with_opcode(&output, Op::ShiftLeftLogical);
        assert_eq!(constant_value(&output, &shifts[0].operands[0]), Some(0xFF));
        assert_eq!(constant_value(&output, &shifts[0].operands[1]), Some(16));
        assert_eq!(shifts[1].operands[0], Operand::IdRef(extracted.result_id.unwrap()));
        assert_eq!(constant_value(&output, &shifts[1].operands[1]), Some(16));
        let not = with_opcode(&output, Op::Not)[0];
        assert_eq!(not.operands, vec![Operand::IdRef(shifts[0].result_id.unwrap())]);
    }

    #[test]
    fn test_packed_char4_constant_lane_extract() {
        let source = r#"
func kernel @second(%buf: ptr[global]<<4 x i8>>, %i: i32) -> void {
entry:
  %p = gep ptr[global]<<4 x i8>> %buf, 0i32
  %v = load <4 x i8> %p
  %e = extractelement i8 %v, 1i32
  %w = insertelement <4 x i8> %v, %e, %i
  store %w, %p
  ret
}
"#;
        let output = build(source);
        let right = with_opcode(&output, Op::ShiftRightLogical)[0];
        assert_eq!(constant_value(&output, &right.operands[1]), Some(8));
        // Only the dynamic insert scales its lane.
        let scale = with_opcode(&output, Op::IMul);
        assert_eq!(scale.len(), 1);
        let shifts = with_opcode(&output, Op::ShiftLeftLogical);
        assert_eq!(shifts.len(), 2);
        assert!(shifts
            .iter()
            .all(|s| s.operands[1] == Operand::IdRef(scale[0].result_id.unwrap())));
        assert_eq!(output.module.count(Op::VectorExtractDynamic), 0);
        assert_eq!(output.module.count(Op::CompositeInsert), 0);
    }

    #[test]
    fn test_hack_undef() {
        let source = r#"
func kernel @u(%out: ptr[global]<i32>) -> void {
entry:
  %p = gep ptr[global]<i32> %out, 0i32
  store undef(i32), %p
  ret
}
"#;
        let output = build(source);
        assert_eq!(output.module.count(Op::Undef), 1);
        assert_eq!(output.module.count(Op::ConstantNull), 0);

        let options = Options {
            hack_undef: true,
            ..Options::default()
        };
        let output = build_with(source, &options);
        let nulls = with_opcode(&output, Op::ConstantNull);
        assert_eq!(nulls.len(), 1);
        let store = with_opcode(&output, Op::Store)[0];
        assert_eq!(store.operands[1], Operand::IdRef(nulls[0].result_id.unwrap()));
    }

    #[test]
    fn test_call_to_later_function() {
        let source = r#"
func kernel @k(%out: ptr[global]<i32>, %x: i32) -> void {
entry:
  %y = call i32 @twice(%x)
  %p = gep ptr[global]<i32> %out, 0i32
  store %y, %p
  ret
}

func @twice(%v: i32) -> i32 {
entry:
  %r = add i32 %v, %v
  ret %r
}
"#;
        let output = build(source);
        let module = &output.module;
        let functions = with_opcode(&output, Op::Function);
        assert_eq!(functions.len(), 2);
        let twice = functions[1].result_id.unwrap();

        let calls = with_opcode(&output, Op::FunctionCall);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operands[0], Operand::IdRef(twice));
        assert_eq!(calls[0].result_type, functions[1].result_type);
        assert!(module.position(Op::FunctionCall) < module.position(Op::FunctionParameter));

        let store = with_opcode(&output, Op::Store)[0];
        assert_eq!(store.operands[1], Operand::IdRef(calls[0].result_id.unwrap()));
    }

    #[test]
    fn test_call_to_missing_function() {
        let source = r#"
func kernel @k(%out: ptr[global]<i32>, %x: i32) -> void {
entry:
  %y = call i32 @elsewhere(%x)
  %p = gep ptr[global]<i32> %out, 0i32
  store %y, %p
  ret
}
"#;
        // Lowering carries on with a placeholder callee.
        let output = build(source);
        let calls = with_opcode(&output, Op::FunctionCall);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operands[0], Operand::IdRef(0));
        assert_eq!(output.module.count(Op::Function), 1);
    }

    #[test]
    fn test_kernel_arg_map_offsets() {
        let source = r#"
func kernel @clustered(%out: ptr[global]<f32>, %tmp: ptr[local]<f32>, %pod: {i32, f32}) -> void
  kernel_arg_map [(out, 0, 0, 0, buffer, 0), (tmp, 1, 1, 0, local, 3), (n, 2, 2, 0, pod, 0), (scale, 3, 2, 4, pod, 0)]
{
entry:
  %s = extractvalue f32 %pod, [1]
  %p = gep ptr[global]<f32> %out, 0i32
  store %s, %p
  ret
}
"#;
        let output = build(source);
        assert_eq!(
            output.descriptor_map.render(),
            "kernel,clustered,arg,out,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n\
             kernel,clustered,arg,tmp,argOrdinal,1,argKind,local,arrayElemSize,4,arrayNumElemSpecId,3\n\
             kernel,clustered,arg,n,argOrdinal,2,descriptorSet,0,binding,1,offset,0,argKind,pod\n\
             kernel,clustered,arg,scale,argOrdinal,3,descriptorSet,0,binding,1,offset,4,argKind,pod\n"
        );

        // The variables are still bound in parameter order.
        let bindings: Vec<_> = decorations(&output, Decoration::Binding)
            .iter()
            .map(|d| d.operands[2].clone())
            .collect();
        assert_eq!(bindings, vec![Operand::LiteralBit32(0), Operand::LiteralBit32(1)]);

        let options = Options {
            pod_args_in_uniform_buffer: true,
            ..Options::default()
        };
        let output = build_with(source, &options);
        assert!(output
            .descriptor_map
            .render()
            .ends_with("binding,1,offset,4,argKind,pod_ubo\n"));
    }

    #[test]
    fn test_kernel_arg_map_unknown_kind() {
        let source = r#"
func kernel @k(%out: ptr[global]<f32>) -> void
  kernel_arg_map [(out, 0, 0, 0, texture, 0)]
{
entry:
  ret
}
"#;
        let err = compile(source, &Options::default()).unwrap_err();
        assert!(matches!(err, ProducerError::Inconsistent(..)), "{err:?}");
        assert!(err.to_string().contains("unknown argument kind 'texture'"));
    }

    #[test]
    fn test_array_length_beyond_32_bits() {
        let source = r#"
global @huge : ptr[local]<[4294967296 x i32]>

func kernel @k() -> void {
entry:
  ret
}
"#;
        let err = compile(source, &Options::default()).unwrap_err();
        assert!(matches!(err, ProducerError::Unsupported(..)), "{err:?}");
        assert!(err.to_string().contains("array length 4294967296"));
    }
}
