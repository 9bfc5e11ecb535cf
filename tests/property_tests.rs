use hkebin::{
    Channels, DataOptions, EngineConfig, HkeBinaryFile, HkeError, RegisterType, TestFileBuilder,
    byte_cursor::ByteCursor,
    parse_header,
    test_data_generator::{BoardSpec, RegisterSpec},
};
use proptest::prelude::*;

fn register_type() -> impl Strategy<Value = RegisterType> {
    prop_oneof![
        Just(RegisterType::UInt8),
        Just(RegisterType::UInt16),
        Just(RegisterType::UInt32),
        Just(RegisterType::Float32),
        Just(RegisterType::Int16),
        Just(RegisterType::Int32),
    ]
}

/// (类型, nch, nsamples, 标志)
fn register_shape() -> impl Strategy<Value = (RegisterType, u16, u16, u8)> {
    (register_type(), 1u16..5, 1u16..5, prop_oneof![Just(0u8), Just(1), Just(2), Just(4)])
}

fn builder_from(boards: &[Vec<(RegisterType, u16, u16, u8)>]) -> TestFileBuilder {
    let mut builder = TestFileBuilder::new();
    for (b, registers) in boards.iter().enumerate() {
        let mut board = BoardSpec::new("ADC", b as u8 + 1, &format!("Board{b}"));
        for (r, &(register_type, nch, nsamples, flags)) in registers.iter().enumerate() {
            let spec = RegisterSpec::new(&format!("r{r}"), register_type).shape(nch, nsamples);
            board = board.register(match flags {
                1 => spec.units("V"),
                2 => spec.calibrated("V", 0.5, 1.0),
                4 => spec.reduced(),
                _ => spec,
            });
        }
        builder = builder.board(board);
    }
    builder
}

fn file_strategy() -> impl Strategy<Value = (Vec<Vec<(RegisterType, u16, u16, u8)>>, usize)> {
    (
        prop::collection::vec(prop::collection::vec(register_shape(), 0..4), 1..4),
        0usize..12,
    )
}

/// 属性测试：字符串逐字节映射为字符
proptest! {
    #[test]
    fn test_latin1_string_round_trip(chars in prop::collection::vec(0u8..=255, 0..255)) {
        let text: String = chars.iter().map(|&b| char::from(b)).collect();
        let header = TestFileBuilder::new().timestamp(&text).header_bytes();
        let fd = parse_header(&header).unwrap();
        prop_assert_eq!(fd.timestamp, text);
        prop_assert_eq!(fd.header_len, header.len());
    }
}

/// 属性测试：任意寄存器组合的解码与编码一致
proptest! {
    #[test]
    fn test_decode_matches_encoder((boards, frames) in file_strategy()) {
        let builder = builder_from(&boards);
        let file = HkeBinaryFile::from_bytes(&builder.build(frames), &EngineConfig::default()).unwrap();

        prop_assert_eq!(file.layout().stride(), builder.stride());
        prop_assert_eq!(file.frame_count(), frames);

        for (index, register) in file.descriptor().registers.iter().enumerate() {
            let block = file.get_raw_column(index).unwrap().to_array().unwrap();
            prop_assert_eq!(block.shape(), &[frames, register.nch(), register.nsamples()]);
            for f in 0..frames {
                for c in 0..register.nch() {
                    for s in 0..register.nsamples() {
                        let want = builder.raw_value(index, f, c * register.nsamples() + s);
                        prop_assert_eq!(block[[f, c, s]].to_bits(), want.to_bits());
                    }
                }
            }

            for options in [DataOptions::default(), DataOptions::raw()] {
                let data = file.get_data(index, &options).unwrap();
                prop_assert_eq!(data.shape(), vec![frames, register.nch()]);
            }
        }
    }
}

/// 属性测试：通道选择保持顺序并允许重复
proptest! {
    #[test]
    fn test_channel_selection(
        nch in 1u16..6,
        picks in prop::collection::vec(0usize..6, 0..8),
        frames in 1usize..6
    ) {
        let builder = builder_from(&[vec![(RegisterType::Int16, nch, 2, 0)]]);
        let file = HkeBinaryFile::from_bytes(&builder.build(frames), &EngineConfig::default()).unwrap();
        let all = file.get_data(0, &DataOptions::default()).unwrap();
        let result = file.get_data(0, &DataOptions::default().channels(Channels::Many(picks.clone())));

        if picks.iter().all(|&c| c < nch as usize) {
            let picked = result.unwrap();
            prop_assert_eq!(picked.values().ncols(), picks.len());
            for (j, &c) in picks.iter().enumerate() {
                prop_assert_eq!(picked.column(j).unwrap(), all.column(c).unwrap());
            }
        } else {
            let is_invalid_channel = matches!(result, Err(HkeError::InvalidChannelSelection { .. }));
            prop_assert!(is_invalid_channel);
        }
    }
}

/// 属性测试：负数索引从末尾计
proptest! {
    #[test]
    fn test_negative_index((boards, frames) in file_strategy()) {
        let builder = builder_from(&boards);
        let file = HkeBinaryFile::from_bytes(&builder.build(frames), &EngineConfig::default()).unwrap();
        let n = file.list_registers().len() as isize;
        for i in 0..n {
            let forward = file.get_register_description(i).unwrap();
            let backward = file.get_register_description(i - n).unwrap();
            prop_assert_eq!(forward.index, backward.index);
        }
        prop_assert!(file.get_register_description(n).is_err());
        prop_assert!(file.get_register_description(-n - 1).is_err());
    }
}

/// 属性测试：截断的文件只会产生结构性错误或更少的帧
proptest! {
    #[test]
    fn test_truncation_is_detected((boards, frames) in file_strategy(), cut in any::<prop::sample::Index>()) {
        let builder = builder_from(&boards);
        let bytes = builder.build(frames);
        let cut = cut.index(bytes.len());
        let header_len = builder.header_bytes().len();
        let result = HkeBinaryFile::from_bytes(&bytes[..cut], &EngineConfig::default());

        if cut < header_len {
            let is_truncated_header = matches!(result, Err(HkeError::TruncatedHeader { .. }));
            prop_assert!(is_truncated_header);
        } else if (cut - header_len) % builder.stride() != 0 {
            let is_truncated_frames = matches!(result, Err(HkeError::TruncatedFrameRegion { .. }));
            prop_assert!(is_truncated_frames);
        } else {
            prop_assert_eq!(result.unwrap().frame_count(), (cut - header_len) / builder.stride());
        }
    }
}

/// 属性测试：任意字节不会导致崩溃
proptest! {
    #[test]
    fn test_arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
        match HkeBinaryFile::from_bytes(&data, &EngineConfig::default()) {
            Ok(file) => prop_assert!(file.descriptor().header_len <= data.len()),
            Err(err) => prop_assert!(err.is_structural()),
        }
    }
}

/// 属性测试：游标读取越界时报告剩余字节
proptest! {
    #[test]
    fn test_cursor_bounds(data in prop::collection::vec(any::<u8>(), 0..16), skip in 0usize..16) {
        let mut cursor = ByteCursor::new(&data);
        let skip = skip.min(data.len());
        cursor.take(skip).unwrap();
        match cursor.read_u32() {
            Ok(_) => prop_assert!(data.len() - skip >= 4),
            Err(HkeError::OutOfBounds { offset, needed, remaining }) => {
                prop_assert_eq!(offset, skip);
                prop_assert_eq!(needed, 4);
                prop_assert_eq!(remaining, data.len() - skip);
            }
            Err(other) => prop_assert!(false, "意外错误: {:?}", other),
        }
    }
}
