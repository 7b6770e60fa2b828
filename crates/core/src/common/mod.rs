use serde_json::{Map, Value};

pub mod time;

/// # Summary
/// 操作参数映射，对应线上协议中的 `params` 对象。
pub type Params = Map<String, Value>;

/// # Summary
/// 判断必填参数是否已提供。
///
/// # Logic
/// 1. 键不存在或值为 `null` 视为缺失。
/// 2. 空白字符串视为缺失。
/// 3. 数字、布尔、对象等其他值原样视为已提供，由后端解释。
///
/// # Arguments
/// * `params`: 请求参数。
/// * `key`: 参数名。
pub fn is_provided(params: &Params, key: &str) -> bool {
    match params.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// # Summary
/// 找出参数中缺失的必填项。
///
/// # Arguments
/// * `params`: 请求参数。
/// * `required`: 必填参数名列表。
///
/// # Returns
/// 缺失参数名列表，全部存在时为空。
pub fn missing_params<'a>(params: &Params, required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .copied()
        .filter(|key| !is_provided(params, key))
        .collect()
}
