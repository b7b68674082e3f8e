use jetbridge::message::Headers;

pub(crate) fn to_bridge_headers(map: &async_nats::HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, values) in map.iter() {
        for value in values {
            headers.insert(name.to_string(), value.to_string());
        }
    }
    headers
}

pub(crate) fn to_nats_headers(headers: &Headers) -> async_nats::HeaderMap {
    let mut map = async_nats::HeaderMap::new();
    for (key, values) in headers.iter() {
        for value in values {
            map.append(key, value.as_str());
        }
    }
    map
}
