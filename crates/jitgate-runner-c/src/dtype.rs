use jitgate::ScalarKind;

pub(crate) fn dtype_tag(dtype: ScalarKind) -> u32 {
    match dtype {
        ScalarKind::Float32 => 0,
        ScalarKind::Float16 => 1,
        ScalarKind::BFloat16 => 2,
        ScalarKind::Int32 => 3,
        ScalarKind::Bool => 4,
        ScalarKind::Int64 => 5,
        ScalarKind::Float64 => 6,
        ScalarKind::UInt8 => 7,
        ScalarKind::Int8 => 8,
        ScalarKind::Int16 => 9,
        ScalarKind::UInt64 => 10,
        ScalarKind::Complex64 => 11,
        ScalarKind::Complex128 => 12,
    }
}

pub(crate) fn dtype_from_tag(tag: u32) -> Option<ScalarKind> {
    let dtype = match tag {
        0 => ScalarKind::Float32,
        1 => ScalarKind::Float16,
        2 => ScalarKind::BFloat16,
        3 => ScalarKind::Int32,
        4 => ScalarKind::Bool,
        5 => ScalarKind::Int64,
        6 => ScalarKind::Float64,
        7 => ScalarKind::UInt8,
        8 => ScalarKind::Int8,
        9 => ScalarKind::Int16,
        10 => ScalarKind::UInt64,
        11 => ScalarKind::Complex64,
        12 => ScalarKind::Complex128,
        _ => return None,
    };
    Some(dtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable_for_common_kinds() {
        assert_eq!(dtype_tag(ScalarKind::Float32), 0);
        assert_eq!(dtype_tag(ScalarKind::Int64), 5);
        assert_eq!(dtype_from_tag(dtype_tag(ScalarKind::BFloat16)), Some(ScalarKind::BFloat16));
        assert_eq!(dtype_from_tag(99), None);
    }
}
