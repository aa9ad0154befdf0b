use kir::{parse_module, parse_type, AddressSpace, OpaqueType, Type};

#[test]
fn test_printed_types_parse_back() {
    let sources = [
        "i32",
        "<4 x i8>",
        "[16 x f32]",
        "{ i32, <2 x f32>, [4 x i8] }",
        "ptr[global]<{ f32 }>",
        "ptr[local]<[8 x i32]>",
        "ptr[constant]<image2d_ro_t>",
    ];
    for source in sources {
        let ty = parse_type(source).expect("Failed to parse type");
        assert_eq!(ty.to_string(), source);
        assert_eq!(parse_type(&ty.to_string()).unwrap(), ty);
    }
}

#[test]
fn test_pointer_queries() {
    let ty = parse_type("ptr[uniform_constant]<sampler_t>").unwrap();
    assert_eq!(ty.address_space(), Some(AddressSpace::UniformConstant));
    assert_eq!(ty.pointee_opaque(), Some(OpaqueType::Sampler));

    let image = parse_type("image3d_wo_t").unwrap();
    assert_eq!(image.as_opaque(), Some(OpaqueType::Image3DWrite));
    assert!(OpaqueType::Image3DWrite.is_write_only_image());
    assert!(OpaqueType::Image3DWrite.is_3d());
}

#[test]
fn test_kernels_listed_before_helpers() {
    let source = r#"
func @helper(%x: i32) -> i32 {
entry:
  ret %x
}

func kernel @main(%out: ptr[global]<i32>) -> void {
entry:
  %v = call i32 @helper(7i32)
  store %v, %out
  ret
}
"#;
    let module = parse_module(source).expect("Failed to parse module");
    let order: Vec<&str> = module
        .functions_kernels_first()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(order, vec!["main", "helper"]);
    assert!(module.calls_function("helper"));
    assert!(!module.calls_function("main"));
    assert_eq!(module.functions[1].params[0].ty, Type::pointer(AddressSpace::Global, Type::i32()));
}
