use super::CssToCode;

/// Wraps a stylesheet in a script that appends it to the document head as a
/// `<style>` element when evaluated. Outside of a browser it does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleInjector;

impl CssToCode for StyleInjector {
    fn css_to_code(&self, css: &str) -> String {
        // A JSON string literal is also a valid JavaScript string literal.
        let literal = serde_json::Value::from(css).to_string();

        format!(
            "(function () {{\n\
             \x20 if (typeof document === 'undefined') return;\n\
             \x20 var style = document.createElement('style');\n\
             \x20 style.textContent = {literal};\n\
             \x20 (document.head || document.getElementsByTagName('head')[0]).appendChild(style);\n\
             }})();\n"
        )
    }
}
