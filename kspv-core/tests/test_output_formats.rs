use kspv_core::{compile, readback, writer, Options, OutputFormat, ProducerError};

const FILL: &str = r#"
func kernel @fill(%out: ptr[global]<f32>, %v: f32) -> void {
entry:
  %p = gep ptr[global]<f32> %out, 0i32
  store %v, %p
  ret
}
"#;

const TWO_KERNELS: &str = r#"
func kernel @first(%a: ptr[global]<i32>) -> void {
entry:
  %p = gep ptr[global]<i32> %a, 0i32
  store 1i32, %p
  ret
}

func kernel @second(%b: ptr[global]<i32>) -> void {
entry:
  %p = gep ptr[global]<i32> %b, 0i32
  store 2i32, %p
  ret
}
"#;

#[test]
fn test_assembly_text() {
    let output = compile(FILL, &Options::default()).expect("Failed to compile");
    let text = writer::write_assembly(&output.module);
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], "; SPIR-V");
    assert_eq!(lines[1], "; Version: 1.0");
    assert_eq!(lines[3].trim_end(), "; Bound: 19");
    assert_eq!(lines[5], "OpCapability Shader");
    assert!(lines.contains(&"OpMemoryModel Logical GLSL450"));
    assert!(lines.contains(&"OpEntryPoint GLCompute %14 \"fill\""));
    assert!(lines.contains(&"OpSource OpenCL_C 120"));
    assert!(lines.contains(&"%1 = OpTypeFloat 32"));
    assert_eq!(lines.last(), Some(&"OpFunctionEnd"));
}

#[test]
fn test_binary_header() {
    let output = compile(FILL, &Options::default()).expect("Failed to compile");
    let bytes = writer::write(&output.module, OutputFormat::Binary);
    let words = writer::words_from_bytes(&bytes);

    assert_eq!(words[0], 0x0723_0203, "First word should be SPIR-V magic number");
    assert_eq!(words[1], 0x0001_0000);
    assert_eq!(words[3], output.module.bound);
    assert_eq!(words[4], 0);

    let summary = readback::summarize(&readback::load_bytes(&bytes).expect("Failed to load"));
    assert_eq!(summary.entry_points, vec!["fill".to_string()]);
    assert_eq!(summary.functions, 1);
    assert_eq!(summary.bound, 19);
}

#[test]
fn test_c_init_list_matches_binary() {
    let output = compile(FILL, &Options::default()).expect("Failed to compile");
    let text = String::from_utf8(writer::write(&output.module, OutputFormat::CInitList)).unwrap();
    assert!(text.starts_with("{119734787,\n65536,\n"));
    assert!(text.ends_with("}\n"));

    let words: Vec<u32> = text
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(",\n")
        .map(|w| w.parse().unwrap())
        .collect();
    assert_eq!(words, writer::words_from_bytes(&writer::write_binary(&output.module)));
}

#[test]
fn test_shared_descriptor_set() {
    let output = compile(TWO_KERNELS, &Options::default()).expect("Failed to compile");
    assert_eq!(
        output.descriptor_map.render(),
        "kernel,first,arg,a,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n\
         kernel,second,arg,b,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n"
    );
}

#[test]
fn test_distinct_descriptor_sets() {
    let options = Options {
        distinct_kernel_descriptor_sets: true,
        ..Options::default()
    };
    let output = compile(TWO_KERNELS, &options).expect("Failed to compile");
    assert_eq!(
        output.descriptor_map.render(),
        "kernel,first,arg,a,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n\
         kernel,second,arg,b,argOrdinal,0,descriptorSet,1,binding,0,offset,0,argKind,buffer\n"
    );
}

#[test]
fn test_parse_errors_surface() {
    let err = compile("func kernel @broken(", &Options::default()).unwrap_err();
    assert!(matches!(err, ProducerError::ParseError(_)), "{err:?}");
}
